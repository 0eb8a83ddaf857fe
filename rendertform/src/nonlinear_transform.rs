use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::data_string::{fields, join_floats, parse_count, parse_floats};
use crate::error::{Result, TransformError};
use crate::linalg::{check_correspondences, lstsq};
use crate::Point;

/// Value of the constant feature that closes every kernel expansion.
const CONSTANT_FEATURE: f64 = 100.0;

/// Class names that share the kernel-expansion representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NonLinearFlavor {
    Coordinate,
    NonLinear,
    LensCorrection,
}

impl NonLinearFlavor {
    pub const ALL: [NonLinearFlavor; 3] = [
        NonLinearFlavor::Coordinate,
        NonLinearFlavor::NonLinear,
        NonLinearFlavor::LensCorrection,
    ];

    pub fn class_name(&self) -> &'static str {
        match self {
            NonLinearFlavor::Coordinate => "mpicbg.trakem2.transform.NonLinearCoordinateTransform",
            NonLinearFlavor::NonLinear => "mpicbg.trakem2.transform.nonLinearTransform",
            NonLinearFlavor::LensCorrection => "lenscorrection.NonLinearTransform",
        }
    }

    pub fn from_class_name(class_name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.class_name() == class_name)
    }
}

/// Number of features of a kernel expansion of `dimension`, including the
/// trailing constant.
pub fn feature_length(dimension: usize) -> usize {
    dimension * (dimension + 3) / 2 + 1
}

/// [`feature_length`], or `None` if it does not fit in a `usize`.
fn checked_feature_length(dimension: usize) -> Option<usize> {
    dimension
        .checked_add(3)?
        .checked_mul(dimension)
        .map(|n| n / 2 + 1)
}

/// A non-linear coordinate transform (as used for lens correction).
///
/// A point is expanded into the monomials `x^j * y^(i-j)` for
/// `i = 1..=dimension` and `j = i` down to `0`, every monomial is
/// standardized by `norm_mean` and `norm_var`, a constant feature of `100.0`
/// is appended, and the result is multiplied by the `length x 2` matrix
/// `beta`.
///
/// `width` and `height` describe the image the transform was fitted on and
/// travel with the dataString; they do not enter the mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct NonLinearCoordinateTransform {
    flavor: NonLinearFlavor,
    dimension: usize,
    beta: DMatrix<f64>,
    norm_mean: Vec<f64>,
    norm_var: Vec<f64>,
    width: usize,
    height: usize,
}

impl NonLinearCoordinateTransform {
    /// An unfitted transform of `dimension`: zero coefficients, zero means and
    /// unit deviations.
    pub fn new(flavor: NonLinearFlavor, dimension: usize, width: usize, height: usize) -> Self {
        let length = feature_length(dimension);
        NonLinearCoordinateTransform {
            flavor,
            dimension,
            beta: DMatrix::zeros(length, 2),
            norm_mean: vec![0.0; length],
            norm_var: vec![1.0; length],
            width,
            height,
        }
    }

    pub fn with_flavor(mut self, flavor: NonLinearFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn get_flavor(&self) -> NonLinearFlavor {
        self.flavor
    }

    pub fn class_name(&self) -> &'static str {
        self.flavor.class_name()
    }

    pub fn get_dimension(&self) -> usize {
        self.dimension
    }

    pub fn get_length(&self) -> usize {
        self.beta.nrows()
    }

    pub fn get_beta(&self) -> &DMatrix<f64> {
        &self.beta
    }

    pub fn get_norm_mean(&self) -> &[f64] {
        &self.norm_mean
    }

    pub fn get_norm_var(&self) -> &[f64] {
        &self.norm_var
    }

    pub fn get_width(&self) -> usize {
        self.width
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    /// Expands `points` into an `N x length` feature matrix standardized by
    /// `norm_mean` and `norm_var`.
    ///
    /// Fails with a format error unless both slices hold `length` values.
    pub fn kernel_expand(
        &self,
        points: &[Point],
        norm_mean: &[f64],
        norm_var: &[f64],
    ) -> Result<DMatrix<f64>> {
        let length = self.get_length();
        if norm_mean.len() != length || norm_var.len() != length {
            return Err(TransformError::format(format!(
                "kernel expansion needs {} normalisation values, got {} means and {} deviations",
                length,
                norm_mean.len(),
                norm_var.len()
            )));
        }
        Ok(self.expand(points, norm_mean, norm_var))
    }

    /// Slices must hold `length` values.
    fn expand(&self, points: &[Point], norm_mean: &[f64], norm_var: &[f64]) -> DMatrix<f64> {
        let length = self.get_length();
        let mut expanded = DMatrix::<f64>::zeros(points.len(), length);
        for (r, p) in points.iter().enumerate() {
            let mut c = 0;
            for i in 1..=self.dimension {
                for j in (0..=i).rev() {
                    expanded[(r, c)] = p[0].powi(j as i32) * p[1].powi((i - j) as i32);
                    c += 1;
                }
            }
            for c in 0..length - 1 {
                expanded[(r, c)] = (expanded[(r, c)] - norm_mean[c]) / norm_var[c];
            }
            expanded[(r, length - 1)] = CONSTANT_FEATURE;
        }
        expanded
    }

    pub fn tform(&self, points: &[Point]) -> Vec<Point> {
        let features = self.expand(points, &self.norm_mean, &self.norm_var);
        let mapped = features * &self.beta;
        mapped.row_iter().map(|row| [row[0], row[1]]).collect()
    }

    /// Fits `beta`, `norm_mean` and `norm_var` to the correspondences
    /// `src -> dst`.
    ///
    /// The means and population standard deviations of the raw expansion of
    /// `src` become the normalisation; the x and y outputs are then solved as
    /// two independent least-squares regressions on the standardized features.
    pub fn estimate(&mut self, src: &[Point], dst: &[Point]) -> Result<()> {
        check_correspondences(src, dst)?;
        let length = self.get_length();
        let raw = self.expand(src, &vec![0.0; length], &vec![1.0; length]);

        let n = src.len() as f64;
        let mut norm_mean = vec![0.0; length];
        let mut norm_var = vec![0.0; length];
        for (c, column) in raw.column_iter().enumerate() {
            let mean = column.sum() / n;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            norm_mean[c] = mean;
            norm_var[c] = var.sqrt();
        }
        if let Some(c) = norm_var[..length - 1].iter().position(|v| *v == 0.0) {
            return Err(TransformError::estimation(format!(
                "kernel feature {} is constant over the source points",
                c
            )));
        }

        let features = self.expand(src, &norm_mean, &norm_var);
        let mut beta = DMatrix::<f64>::zeros(length, 2);
        for k in 0..2 {
            let target = DVector::from_iterator(src.len(), dst.iter().map(|p| p[k]));
            let (coeff, rank) = lstsq(features.clone(), &target)?;
            debug!("non-linear regression {} solved with rank {} of {}", k, rank, length);
            beta.set_column(k, &coeff);
        }

        self.beta = beta;
        self.norm_mean = norm_mean;
        self.norm_var = norm_var;
        Ok(())
    }

    /// `dimension length <beta row-major> <norm_mean> <norm_var> height width`.
    pub fn data_string(&self) -> String {
        let beta: Vec<f64> = self.beta.row_iter().flat_map(|r| [r[0], r[1]]).collect();
        format!(
            "{} {} {} {} {} {} {}",
            self.dimension,
            self.get_length(),
            join_floats(&beta),
            join_floats(&self.norm_mean),
            join_floats(&self.norm_var),
            self.height,
            self.width
        )
    }

    pub fn from_data_string(flavor: NonLinearFlavor, data_string: &str) -> Result<Self> {
        let fields = fields(data_string);
        if fields.len() < 2 {
            return Err(TransformError::format(format!(
                "non-linear dataString is too short: '{}'",
                data_string
            )));
        }
        let dimension = parse_count(fields[0], "dimension")?;
        let length = parse_count(fields[1], "length")?;
        match checked_feature_length(dimension) {
            Some(n) if n == length => {}
            Some(n) => {
                return Err(TransformError::format(format!(
                    "length {} does not match dimension {} (expected {})",
                    length, dimension, n
                )))
            }
            None => {
                return Err(TransformError::format(format!(
                    "dimension {} is too large",
                    dimension
                )))
            }
        }
        let expected = length.checked_mul(4).and_then(|n| n.checked_add(4));
        if expected != Some(fields.len()) {
            return Err(TransformError::format(format!(
                "incorrect number of coefficients in non-linear dataString: {} fields for length {}",
                fields.len(),
                length
            )));
        }
        let n = fields.len();
        let data = parse_floats(&fields[2..2 + 4 * length], "non-linear coefficient")?;
        Ok(NonLinearCoordinateTransform {
            flavor,
            dimension,
            beta: DMatrix::from_row_slice(length, 2, &data[..2 * length]),
            norm_mean: data[2 * length..3 * length].to_vec(),
            norm_var: data[3 * length..].to_vec(),
            height: parse_count(fields[n - 2], "height")?,
            width: parse_count(fields[n - 1], "width")?,
        })
    }
}
