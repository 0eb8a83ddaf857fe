use std::fmt;

use log::debug;
use nalgebra::{DMatrix, DVector, Matrix2, Matrix3, Vector2};

use crate::data_string::{fields, format_float, parse_float};
use crate::error::{Result, TransformError};
use crate::first_order::{calc_first_order_properties, FirstOrderProperties, ShearAxis};
use crate::linalg::{check_correspondences, lstsq, mean};
use crate::Point;

/// The members of the affine family. They share one 2x3 representation and
/// differ in how they are fitted and written to a dataString.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AffineFlavor {
    /// Unconstrained 6-parameter affine.
    Affine,
    /// Translation only.
    Translation,
    /// Rotation and translation.
    Rigid,
    /// Uniform scale, rotation and translation.
    Similarity,
}

impl AffineFlavor {
    pub const ALL: [AffineFlavor; 4] = [
        AffineFlavor::Affine,
        AffineFlavor::Translation,
        AffineFlavor::Rigid,
        AffineFlavor::Similarity,
    ];

    /// The external class name of this flavor.
    pub fn class_name(&self) -> &'static str {
        match self {
            AffineFlavor::Affine => "mpicbg.trakem2.transform.AffineModel2D",
            AffineFlavor::Translation => "mpicbg.trakem2.transform.TranslationModel2D",
            AffineFlavor::Rigid => "mpicbg.trakem2.transform.RigidModel2D",
            AffineFlavor::Similarity => "mpicbg.trakem2.transform.SimilarityModel2D",
        }
    }

    pub fn from_class_name(class_name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.class_name() == class_name)
    }
}

/// A 2D affine transformation `x' = M·x + B`:
///
/// ```text
///   x' = m00 * x + m01 * y + b0
///   y' = m10 * x + m11 * y + b1
/// ```
///
/// Translation, rigid and similarity models are affine models whose
/// [`AffineFlavor`] constrains fitting and selects the dataString grammar.
///
/// # Examples
/// ```
/// use rendertform::affine_model::AffineModel;
///
/// // x' = x + 2y + 5, y' = y
/// let am = AffineModel::new(1.0, 2.0, 0.0, 1.0, 5.0, 0.0);
/// assert_eq!((am.m01, am.b0), (2.0, 5.0));
/// assert_eq!(am.tform(&[[0.0, 1.0]]), vec![[7.0, 1.0]]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineModel {
    /// Linear block, row 0: weight of x in x'.
    pub m00: f64,
    /// Linear block, row 0: weight of y in x'.
    pub m01: f64,
    /// Linear block, row 1: weight of x in y'.
    pub m10: f64,
    /// Linear block, row 1: weight of y in y'.
    pub m11: f64,
    /// Translation in x.
    pub b0: f64,
    /// Translation in y.
    pub b1: f64,
    /// Model family; fixes the fit constraints and the serialized class name.
    pub flavor: AffineFlavor,
    /// Axis that absorbs shear in [`AffineModel::calc_properties`].
    pub force_shear: ShearAxis,
}

impl Default for AffineModel {
    fn default() -> Self {
        AffineModel::identity()
    }
}

impl AffineModel {
    /// Creates an unconstrained affine model from its six parameters.
    ///
    /// # Examples
    /// ```
    /// # use rendertform::affine_model::AffineModel;
    /// let am = AffineModel::new(1.0, 0.0, 0.0, 1.0, 10.0, -5.0);
    /// assert_eq!(am.tform(&[[1.0, 2.0]]), vec![[11.0, -3.0]]);
    /// ```
    pub fn new(m00: f64, m01: f64, m10: f64, m11: f64, b0: f64, b1: f64) -> Self {
        AffineModel {
            m00,
            m01,
            m10,
            m11,
            b0,
            b1,
            flavor: AffineFlavor::Affine,
            force_shear: ShearAxis::X,
        }
    }

    pub fn identity() -> Self {
        AffineModel::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    pub fn from_translation(tx: f64, ty: f64) -> Self {
        AffineModel::new(1.0, 0.0, 0.0, 1.0, tx, ty).with_flavor(AffineFlavor::Translation)
    }

    /// Counter-clockwise rotation by `theta` followed by a translation.
    pub fn from_rigid(theta: f64, tx: f64, ty: f64) -> Self {
        let (s, c) = theta.sin_cos();
        AffineModel::new(c, -s, s, c, tx, ty).with_flavor(AffineFlavor::Rigid)
    }

    /// Uniform scale `s` and counter-clockwise rotation `theta`, then translation.
    pub fn from_similarity(s: f64, theta: f64, tx: f64, ty: f64) -> Self {
        let (sin, cos) = theta.sin_cos();
        AffineModel::new(s * cos, -s * sin, s * sin, s * cos, tx, ty)
            .with_flavor(AffineFlavor::Similarity)
    }

    /// Builds a model from the top two rows of a homogeneous 3x3 matrix.
    pub fn from_matrix(m: &Matrix3<f64>) -> Self {
        AffineModel::new(m[(0, 0)], m[(0, 1)], m[(1, 0)], m[(1, 1)], m[(0, 2)], m[(1, 2)])
    }

    pub fn with_flavor(mut self, flavor: AffineFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn with_force_shear(mut self, force_shear: ShearAxis) -> Self {
        self.force_shear = force_shear;
        self
    }

    pub fn class_name(&self) -> &'static str {
        self.flavor.class_name()
    }

    /// The 3x3 homogeneous matrix of this model.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.m00, self.m01, self.b0, //
            self.m10, self.m11, self.b1, //
            0.0, 0.0, 1.0,
        )
    }

    /// The 2x2 linear block.
    pub fn linear(&self) -> Matrix2<f64> {
        Matrix2::new(self.m00, self.m01, self.m10, self.m11)
    }

    pub fn apply(&self, p: Point) -> Point {
        [
            self.m00 * p[0] + self.m01 * p[1] + self.b0,
            self.m10 * p[0] + self.m11 * p[1] + self.b1,
        ]
    }

    /// Transforms a set of points through this model.
    pub fn tform(&self, points: &[Point]) -> Vec<Point> {
        points.iter().map(|p| self.apply(*p)).collect()
    }

    /// Transforms a set of points through the inverse of this model.
    ///
    /// Fails with an estimation error when the linear block is singular.
    pub fn inverse_tform(&self, points: &[Point]) -> Result<Vec<Point>> {
        Ok(self.invert()?.tform(points))
    }

    /// Returns the closed-form inverse of this model.
    pub fn invert(&self) -> Result<AffineModel> {
        let inv = self.matrix().try_inverse().ok_or_else(|| {
            TransformError::estimation(format!("affine model {} is not invertible", self))
        })?;
        Ok(AffineModel::from_matrix(&inv).with_force_shear(self.force_shear))
    }

    /// Returns the model equal to applying `other` first and then `self`
    /// (the matrix product `self.M · other.M`).
    ///
    /// # Examples
    /// ```
    /// # use rendertform::affine_model::AffineModel;
    /// let shift = AffineModel::from_translation(1.0, 0.0);
    /// let double = AffineModel::new(2.0, 0.0, 0.0, 2.0, 0.0, 0.0);
    /// // double first, then shift
    /// assert_eq!(shift.concatenate(&double).tform(&[[1.0, 1.0]]), vec![[3.0, 2.0]]);
    /// ```
    pub fn concatenate(&self, other: &AffineModel) -> AffineModel {
        AffineModel::from_matrix(&(self.matrix() * other.matrix())).with_force_shear(self.force_shear)
    }

    /// Fits a model of the given flavor to the correspondences `src -> dst`.
    pub fn fit(flavor: AffineFlavor, src: &[Point], dst: &[Point]) -> Result<AffineModel> {
        let model = match flavor {
            AffineFlavor::Affine => fit_affine(src, dst)?,
            AffineFlavor::Translation => fit_translation(src, dst)?,
            AffineFlavor::Rigid => fit_umeyama(src, dst, true)?,
            AffineFlavor::Similarity => fit_umeyama(src, dst, false)?,
        };
        Ok(model.with_flavor(flavor))
    }

    /// Re-estimates this model in place from the correspondences `src -> dst`,
    /// keeping its flavor.
    pub fn estimate(&mut self, src: &[Point], dst: &[Point]) -> Result<()> {
        let fitted = AffineModel::fit(self.flavor, src, dst)?;
        *self = fitted.with_force_shear(self.force_shear);
        Ok(())
    }

    pub fn calc_properties(&self) -> FirstOrderProperties {
        calc_first_order_properties(&self.linear(), self.force_shear)
    }

    /// Scale in x and y.
    pub fn scale(&self) -> (f64, f64) {
        let p = self.calc_properties();
        (p.sx, p.sy)
    }

    pub fn shear(&self) -> f64 {
        self.calc_properties().shear(self.force_shear)
    }

    /// Counter-clockwise rotation in radians.
    pub fn rotation(&self) -> f64 {
        self.calc_properties().theta
    }

    pub fn translation(&self) -> (f64, f64) {
        (self.b0, self.b1)
    }

    /// Writes the parameters in the grammar of this model's flavor.
    pub fn data_string(&self) -> String {
        match self.flavor {
            AffineFlavor::Affine => format!(
                "{:.10} {:.10} {:.10} {:.10} {:.10} {:.10}",
                self.m00, self.m10, self.m01, self.m11, self.b0, self.b1
            ),
            AffineFlavor::Translation => {
                format!("{} {}", format_float(self.b0), format_float(self.b1))
            }
            AffineFlavor::Rigid => format!(
                "{} {} {}",
                format_float(self.m10.atan2(self.m00)),
                format_float(self.b0),
                format_float(self.b1)
            ),
            AffineFlavor::Similarity => format!(
                "{} {} {} {}",
                format_float((self.m00.powi(2) + self.m10.powi(2)).sqrt()),
                format_float(self.m10.atan2(self.m00)),
                format_float(self.b0),
                format_float(self.b1)
            ),
        }
    }

    /// Parses a dataString in the grammar of `flavor`.
    pub fn from_data_string(flavor: AffineFlavor, data_string: &str) -> Result<AffineModel> {
        let fields = fields(data_string);
        let expected = match flavor {
            AffineFlavor::Affine => 6,
            AffineFlavor::Translation => 2,
            AffineFlavor::Rigid => 3,
            AffineFlavor::Similarity => 4,
        };
        if fields.len() != expected {
            return Err(TransformError::format(format!(
                "{} expects {} values, got {} in '{}'",
                flavor.class_name(),
                expected,
                fields.len(),
                data_string
            )));
        }
        let v = fields
            .iter()
            .map(|f| parse_float(f, "affine parameter"))
            .collect::<Result<Vec<_>>>()?;
        Ok(match flavor {
            AffineFlavor::Affine => AffineModel::new(v[0], v[2], v[1], v[3], v[4], v[5]),
            AffineFlavor::Translation => AffineModel::from_translation(v[0], v[1]),
            AffineFlavor::Rigid => AffineModel::from_rigid(v[0], v[1], v[2]),
            AffineFlavor::Similarity => AffineModel::from_similarity(v[0], v[1], v[2], v[3]),
        })
    }
}

impl fmt::Display for AffineModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "M=[[{:.6},{:.6}],[{:.6},{:.6}]] B=[{:.6},{:.6}]",
            self.m00, self.m01, self.m10, self.m11, self.b0, self.b1
        )
    }
}

/// Ordinary least squares over the 2N x 6 system `M·src + B = dst`.
fn fit_affine(src: &[Point], dst: &[Point]) -> Result<AffineModel> {
    check_correspondences(src, dst)?;
    if src.len() < 3 {
        return Err(TransformError::estimation(format!(
            "an affine fit needs at least 3 correspondences, got {}",
            src.len()
        )));
    }
    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 6);
    let mut y = DVector::<f64>::zeros(2 * n);
    for (i, (s, d)) in src.iter().zip(dst).enumerate() {
        a[(2 * i, 0)] = s[0];
        a[(2 * i, 1)] = s[1];
        a[(2 * i, 4)] = 1.0;
        a[(2 * i + 1, 2)] = s[0];
        a[(2 * i + 1, 3)] = s[1];
        a[(2 * i + 1, 5)] = 1.0;
        y[2 * i] = d[0];
        y[2 * i + 1] = d[1];
    }
    let (t, rank) = lstsq(a, &y)?;
    if rank < 6 {
        return Err(TransformError::estimation(format!(
            "affine fit is ill-conditioned (rank {} of 6); are the source points collinear?",
            rank
        )));
    }
    Ok(AffineModel::new(t[0], t[1], t[2], t[3], t[4], t[5]))
}

fn fit_translation(src: &[Point], dst: &[Point]) -> Result<AffineModel> {
    check_correspondences(src, dst)?;
    let s = mean(src);
    let d = mean(dst);
    Ok(AffineModel::from_translation(d[0] - s[0], d[1] - s[1]))
}

/// Singular value decomposition of a 2x2 matrix with the singular values in
/// descending order.
fn sorted_svd2(a: Matrix2<f64>) -> Result<(Matrix2<f64>, Vector2<f64>, Matrix2<f64>)> {
    let svd = a.svd(true, true);
    let (mut u, mut v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(TransformError::estimation("SVD of the cross covariance failed")),
    };
    let mut s = svd.singular_values;
    if s[0] < s[1] {
        s.swap_rows(0, 1);
        u.swap_columns(0, 1);
        v_t.swap_rows(0, 1);
    }
    Ok((u, s, v_t))
}

/// Umeyama estimation of a rigid (`rigid == true`) or similarity transform.
fn fit_umeyama(src: &[Point], dst: &[Point], rigid: bool) -> Result<AffineModel> {
    check_correspondences(src, dst)?;
    let n = src.len() as f64;
    let src_mean = mean(src);
    let dst_mean = mean(dst);

    let mut cov = Matrix2::<f64>::zeros();
    let mut src_var = 0.0;
    for (s, d) in src.iter().zip(dst) {
        let sc = Vector2::new(s[0] - src_mean[0], s[1] - src_mean[1]);
        let dc = Vector2::new(d[0] - dst_mean[0], d[1] - dst_mean[1]);
        cov += dc * sc.transpose();
        src_var += sc.norm_squared();
    }
    cov /= n;
    src_var /= n;

    let mut d = Vector2::new(1.0, 1.0);
    if cov.determinant() < 0.0 {
        d[1] = -1.0;
    }

    let (u, s, v_t) = sorted_svd2(cov)?;
    let tol = s[0] * 2.0 * f64::EPSILON;
    let rank = s.iter().filter(|v| **v > tol).count();
    if rank == 0 {
        return Err(TransformError::estimation(
            "zero rank cross covariance -- likely poorly conditioned",
        ));
    }

    let rotation = if rank == 1 {
        if u.determinant() * v_t.determinant() > 0.0 {
            u * v_t
        } else {
            u * Matrix2::from_diagonal(&Vector2::new(1.0, -1.0)) * v_t
        }
    } else {
        u * Matrix2::from_diagonal(&d) * v_t
    };

    let scale = if rigid {
        1.0
    } else {
        if src_var == 0.0 {
            return Err(TransformError::estimation(
                "source points have no spread; similarity scale is undefined",
            ));
        }
        s.dot(&d) / src_var
    };
    debug!("umeyama fit: rank {}, scale {}", rank, scale);

    let linear = rotation * scale;
    let t = Vector2::new(dst_mean[0], dst_mean[1]) - linear * Vector2::new(src_mean[0], src_mean[1]);
    Ok(AffineModel::new(
        linear[(0, 0)],
        linear[(0, 1)],
        linear[(1, 0)],
        linear[(1, 1)],
        t[0],
        t[1],
    ))
}
