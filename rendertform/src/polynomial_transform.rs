use log::{debug, warn};
use nalgebra::{DMatrix, Matrix2, SVD};

use crate::affine_model::AffineModel;
use crate::config::PolynomialFitConfig;
use crate::data_string::{fields, join_floats, parse_floats};
use crate::error::{Result, TransformError};
use crate::first_order::{calc_first_order_properties, FirstOrderProperties, ShearAxis};
use crate::linalg::{allclose, check_correspondences};
use crate::Point;

pub const POLYNOMIAL_CLASS_NAME: &str = "mpicbg.trakem2.transform.PolynomialTransform2D";

/// A 2D polynomial transform.
///
/// `params` is a 2 x K matrix, row 0 for x' and row 1 for y'. Column `c`
/// multiplies the monomial `x^(j-i) * y^i`, enumerated for `j = 0..=order`,
/// `i = 0..=j`:
///
/// ```text
///   order 1:  1, x, y
///   order 2:  1, x, y, x², xy, y²
/// ```
///
/// # Examples
/// ```
/// # use rendertform::polynomial_transform::Polynomial2DTransform;
/// let pt = Polynomial2DTransform::identity();
/// assert_eq!(pt.order(), 1);
/// assert_eq!(pt.tform(&[[3.0, 4.0]]), vec![[3.0, 4.0]]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial2DTransform {
    params: DMatrix<f64>,
    force_shear: ShearAxis,
}

/// Number of parameters (both rows) of a polynomial of `order`.
pub fn coefficient_count(order: usize) -> usize {
    (order + 1) * (order + 2)
}

/// Inverts [`coefficient_count`], if `count` belongs to an order.
fn order_of(count: usize) -> Option<usize> {
    let order = (((4 * count + 1) as f64).sqrt() - 3.0) / 2.0;
    let order = order.round().max(0.0) as usize;
    (coefficient_count(order) == count).then_some(order)
}

fn monomials(p: Point, order: usize) -> impl Iterator<Item = f64> {
    (0..=order).flat_map(move |j| (0..=j).map(move |i| p[0].powi((j - i) as i32) * p[1].powi(i as i32)))
}

impl Polynomial2DTransform {
    /// Wraps a 2 x K coefficient matrix. K must be the per-row coefficient
    /// count of some order.
    pub fn from_params(params: DMatrix<f64>) -> Result<Self> {
        if params.nrows() != 2 || order_of(params.len()).is_none() {
            return Err(TransformError::format(format!(
                "a {}x{} parameter matrix is not a 2D polynomial",
                params.nrows(),
                params.ncols()
            )));
        }
        Ok(Polynomial2DTransform {
            params,
            force_shear: ShearAxis::X,
        })
    }

    pub fn identity() -> Self {
        Polynomial2DTransform {
            params: DMatrix::from_row_slice(2, 3, &[0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
            force_shear: ShearAxis::X,
        }
    }

    /// The order-1 polynomial with the same effect as `aff`.
    pub fn from_affine(aff: &AffineModel) -> Self {
        Polynomial2DTransform {
            params: DMatrix::from_row_slice(
                2,
                3,
                &[aff.b0, aff.m00, aff.m01, aff.b1, aff.m10, aff.m11],
            ),
            force_shear: aff.force_shear,
        }
    }

    pub fn with_force_shear(mut self, force_shear: ShearAxis) -> Self {
        self.force_shear = force_shear;
        self
    }

    pub fn get_params(&self) -> &DMatrix<f64> {
        &self.params
    }

    pub fn order(&self) -> usize {
        order_of(self.params.len()).unwrap_or(0)
    }

    pub fn apply(&self, p: Point) -> Point {
        let mut out = [0.0, 0.0];
        for (c, m) in monomials(p, self.order()).enumerate() {
            out[0] += self.params[(0, c)] * m;
            out[1] += self.params[(1, c)] * m;
        }
        out
    }

    pub fn tform(&self, points: &[Point]) -> Vec<Point> {
        points.iter().map(|p| self.apply(*p)).collect()
    }

    /// One total-least-squares fit of a polynomial of `order` to `src -> dst`.
    ///
    /// The monomials of `src` fill an x block and a y block of a 2N x (K+1)
    /// design matrix whose last column holds the destination coordinates.
    /// The right singular vector of the smallest singular value gives the
    /// parameters after normalising by its last entry.
    ///
    /// # Returns
    /// The 2 x K/2 parameter matrix.
    pub fn fit(src: &[Point], dst: &[Point], order: usize) -> Result<DMatrix<f64>> {
        check_correspondences(src, dst)?;
        let k = coefficient_count(order);
        if k > src.len() {
            return Err(TransformError::estimation(format!(
                "order {} is too large to fit {} points!",
                order,
                src.len()
            )));
        }
        let rows = src.len();
        let half = k / 2;
        let mut a = DMatrix::<f64>::zeros(2 * rows, k + 1);
        for (r, (s, d)) in src.iter().zip(dst).enumerate() {
            for (c, m) in monomials(*s, order).enumerate() {
                a[(r, c)] = m;
                a[(rows + r, half + c)] = m;
            }
            a[(r, k)] = d[0];
            a[(rows + r, k)] = d[1];
        }

        let svd = SVD::new(a, false, true);
        let v_t = svd
            .v_t
            .ok_or_else(|| TransformError::estimation("SVD did not produce V^T"))?;
        let smallest = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by(|x, y| x.1.total_cmp(y.1))
            .map(|(i, _)| i)
            .ok_or_else(|| TransformError::estimation("SVD produced no singular values"))?;
        let v = v_t.row(smallest);
        let last = v[k];
        if last == 0.0 || !last.is_finite() {
            return Err(TransformError::estimation(
                "smallest singular vector has no destination component",
            ));
        }
        Ok(DMatrix::from_fn(2, half, |r, c| -v[r * half + c] / last))
    }

    /// Fits a polynomial of `order` to `src -> dst`, checking that the result
    /// reproduces `dst` within `config.atol`/`config.rtol` and retrying up to
    /// `config.max_tries` times.
    ///
    /// Correspondence count and shape problems are reported immediately;
    /// numerical failures are retried.
    pub fn estimate(
        src: &[Point],
        dst: &[Point],
        order: usize,
        config: &PolynomialFitConfig,
    ) -> Result<Self> {
        check_correspondences(src, dst)?;
        if coefficient_count(order) > src.len() {
            return Err(TransformError::estimation(format!(
                "order {} is too large to fit {} points!",
                order,
                src.len()
            )));
        }
        for attempt in 1..=config.max_tries.max(1) {
            let params = match Polynomial2DTransform::fit(src, dst, order) {
                Ok(params) => params,
                Err(e) => {
                    debug!("polynomial fit attempt {} failed: {}", attempt, e);
                    continue;
                }
            };
            let candidate = Polynomial2DTransform {
                params,
                force_shear: ShearAxis::X,
            };
            if !config.test_coords
                || allclose(&candidate.tform(src), dst, config.atol, config.rtol)
            {
                debug!("fit polynomial parameters in {} attempts", attempt);
                return Ok(candidate);
            }
            warn!(
                "polynomial fit attempt {} does not reproduce the destination points",
                attempt
            );
        }
        Err(TransformError::estimation(format!(
            "Could not fit Polynomial in {} attempts!",
            config.max_tries.max(1)
        )))
    }

    /// Re-expresses this polynomial at a higher or equal `order` by
    /// zero-padding the coefficients.
    ///
    /// # Examples
    /// ```
    /// # use rendertform::polynomial_transform::Polynomial2DTransform;
    /// let cubic = Polynomial2DTransform::identity().asorder(3).unwrap();
    /// assert_eq!(cubic.order(), 3);
    /// assert_eq!(cubic.tform(&[[2.0, 5.0]]), vec![[2.0, 5.0]]);
    /// assert!(cubic.asorder(2).is_err());
    /// ```
    pub fn asorder(&self, order: usize) -> Result<Self> {
        if self.order() > order {
            return Err(TransformError::conversion(format!(
                "transformation {} is order {} -- conversion to order {} not supported",
                self.data_string(),
                self.order(),
                order
            )));
        }
        let mut params = DMatrix::zeros(2, coefficient_count(order) / 2);
        params
            .slice_mut((0, 0), (2, self.params.ncols()))
            .copy_from(&self.params);
        Ok(Polynomial2DTransform {
            params,
            force_shear: self.force_shear,
        })
    }

    pub fn calc_properties(&self) -> FirstOrderProperties {
        if self.order() == 0 {
            return FirstOrderProperties::identity();
        }
        let m = Matrix2::new(
            self.params[(0, 1)],
            self.params[(0, 2)],
            self.params[(1, 1)],
            self.params[(1, 2)],
        );
        calc_first_order_properties(&m, self.force_shear)
    }

    pub fn scale(&self) -> (f64, f64) {
        let p = self.calc_properties();
        (p.sx, p.sy)
    }

    pub fn shear(&self) -> f64 {
        self.calc_properties().shear(self.force_shear)
    }

    pub fn rotation(&self) -> f64 {
        self.calc_properties().theta
    }

    pub fn translation(&self) -> (f64, f64) {
        (self.params[(0, 0)], self.params[(1, 0)])
    }

    /// x coefficients followed by y coefficients.
    pub fn data_string(&self) -> String {
        let x = self.params.row(0).iter().cloned().collect::<Vec<_>>();
        let y = self.params.row(1).iter().cloned().collect::<Vec<_>>();
        join_floats(x.iter().chain(y.iter()))
    }

    pub fn from_data_string(data_string: &str) -> Result<Self> {
        let values = parse_floats(&fields(data_string), "polynomial coefficient")?;
        if values.is_empty() || values.len() % 2 != 0 {
            return Err(TransformError::format(format!(
                "polynomial dataString needs an even number of coefficients, got {}",
                values.len()
            )));
        }
        Polynomial2DTransform::from_params(DMatrix::from_row_slice(2, values.len() / 2, &values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND_ORDER_DATA_STRING: &str = "67572.7356991 0.972637082773 -0.0266434803369 \
        -3.08962731867E-06 3.52672451824E-06 1.36924119761E-07 \
        5446.85340052 0.0224047626583 0.961202608454 \
        -3.36753624487E-07 -8.97219078255E-07 -5.49854010072E-06";

    fn cloud() -> Vec<Point> {
        let mut pts = Vec::new();
        for i in 0..8 {
            for j in 0..8 {
                pts.push([i as f64 * 0.25 - 1.0, j as f64 * 0.3 - 1.2]);
            }
        }
        pts
    }

    #[test]
    fn data_string_round_trip() {
        let pt = Polynomial2DTransform::from_data_string(SECOND_ORDER_DATA_STRING).unwrap();
        assert_eq!(pt.order(), 2);
        assert_eq!(pt.get_params().ncols(), 6);
        let back = Polynomial2DTransform::from_data_string(&pt.data_string()).unwrap();
        assert_eq!(back, pt);
        assert!(pt.data_string().starts_with("67572.7356991 0.972637082773"));
        assert!(pt.data_string().contains("-3.08962731867E-6"));
        assert!(pt.data_string().contains("1.36924119761E-7"));
    }

    #[test]
    fn odd_or_impossible_coefficient_counts_are_rejected() {
        assert!(Polynomial2DTransform::from_data_string("1 2 3").is_err());
        assert!(Polynomial2DTransform::from_data_string("1 2 3 4").is_err());
        assert!(Polynomial2DTransform::from_data_string("").is_err());
    }

    #[test]
    fn fit_recovers_quadratic() {
        let truth = Polynomial2DTransform::from_params(DMatrix::from_row_slice(
            2,
            6,
            &[0.5, 1.1, 0.05, 0.02, -0.03, 0.01, -0.2, -0.04, 0.95, 0.01, 0.02, -0.015],
        ))
        .unwrap();
        let src = cloud();
        let dst = truth.tform(&src);
        let fitted =
            Polynomial2DTransform::estimate(&src, &dst, 2, &PolynomialFitConfig::default())
                .unwrap();
        assert_eq!(fitted.order(), 2);
        for (a, b) in fitted.get_params().iter().zip(truth.get_params().iter()) {
            assert!((a - b).abs() < 1e-8, "{} vs {}", a, b);
        }
    }

    #[test]
    fn too_few_points_for_order() {
        let src = cloud()[..5].to_vec();
        let err = Polynomial2DTransform::estimate(&src, &src, 2, &PolynomialFitConfig::default())
            .unwrap_err();
        assert!(matches!(err, TransformError::Estimation(_)));
        assert!(Polynomial2DTransform::fit(&src, &src[..4], 1).is_err());
    }

    #[test]
    fn from_affine_matches_affine() {
        let am = AffineModel::new(0.9, 0.3, -0.2, 0.85, 245.3, -234.1);
        let pt = Polynomial2DTransform::from_affine(&am);
        assert_eq!(pt.order(), 1);
        let src = cloud();
        for (p, q) in pt.tform(&src).iter().zip(am.tform(&src)) {
            assert!((p[0] - q[0]).abs() < 1e-9 && (p[1] - q[1]).abs() < 1e-9);
        }
        assert!((pt.rotation() - am.rotation()).abs() < 1e-12);
        assert_eq!(pt.translation(), (245.3, -234.1));
    }

    #[test]
    fn constant_polynomial_has_identity_properties() {
        let pt = Polynomial2DTransform::from_params(DMatrix::from_row_slice(2, 1, &[3.0, 4.0]))
            .unwrap();
        assert_eq!(pt.order(), 0);
        assert_eq!(pt.scale(), (1.0, 1.0));
        assert_eq!(pt.rotation(), 0.0);
        assert_eq!(pt.tform(&[[10.0, 10.0]]), vec![[3.0, 4.0]]);
    }

    #[test]
    fn asorder_pads_with_zeros() {
        let pt = Polynomial2DTransform::from_data_string(SECOND_ORDER_DATA_STRING).unwrap();
        let higher = pt.asorder(3).unwrap();
        assert_eq!(higher.order(), 3);
        assert_eq!(higher.get_params().ncols(), 10);
        assert_eq!(higher.tform(&cloud()), pt.tform(&cloud()));
        assert!(matches!(pt.asorder(1), Err(TransformError::Conversion(_))));
    }
}
