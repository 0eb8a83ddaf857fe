use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};

/// Which axis absorbs the shear when a 2x2 linear block is decomposed into
/// scale, shear and rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShearAxis {
    #[default]
    X,
    Y,
}

/// Scale, shear and rotation of a 2x2 linear block.
///
/// Only one of `cx`/`cy` is non-zero, depending on the [`ShearAxis`] used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FirstOrderProperties {
    /// Scale in x.
    pub sx: f64,
    /// Scale in y.
    pub sy: f64,
    /// Shear in x.
    pub cx: f64,
    /// Shear in y.
    pub cy: f64,
    /// Counter-clockwise rotation, in radians.
    pub theta: f64,
}

impl FirstOrderProperties {
    /// Properties of the identity.
    pub fn identity() -> Self {
        FirstOrderProperties {
            sx: 1.0,
            sy: 1.0,
            cx: 0.0,
            cy: 0.0,
            theta: 0.0,
        }
    }

    /// The shear along the axis that was forced to carry it.
    pub fn shear(&self, axis: ShearAxis) -> f64 {
        match axis {
            ShearAxis::X => self.cx,
            ShearAxis::Y => self.cy,
        }
    }
}

/// Decomposes the linear block `m` of an affine (or the first-order terms of a
/// polynomial) into scale, shear and rotation.
///
/// # Examples
/// ```
/// use nalgebra::Matrix2;
/// use rendertform::first_order::{calc_first_order_properties, ShearAxis};
/// let p = calc_first_order_properties(&Matrix2::new(2.0, 0.0, 0.0, 3.0), ShearAxis::X);
/// assert!((p.sx - 2.0).abs() < 1e-12 && (p.sy - 3.0).abs() < 1e-12);
/// assert!(p.theta.abs() < 1e-12 && p.cx.abs() < 1e-12);
/// ```
pub fn calc_first_order_properties(m: &Matrix2<f64>, force_shear: ShearAxis) -> FirstOrderProperties {
    match force_shear {
        ShearAxis::X => {
            let sy = (m[(1, 0)].powi(2) + m[(1, 1)].powi(2)).sqrt();
            let theta = m[(1, 0)].atan2(m[(1, 1)]);
            let (rs, rc) = theta.sin_cos();
            let sx = rc * m[(0, 0)] - rs * m[(0, 1)];
            let cx = if rs != 0.0 {
                (m[(0, 0)] - sx * rc) / (sx * rs)
            } else {
                (m[(0, 1)] - sx * rs) / (sx * rc)
            };
            FirstOrderProperties {
                sx,
                sy,
                cx,
                cy: 0.0,
                theta,
            }
        }
        ShearAxis::Y => {
            let sx = (m[(0, 0)].powi(2) + m[(0, 1)].powi(2)).sqrt();
            let theta = (-m[(0, 1)]).atan2(m[(0, 0)]);
            let (rs, rc) = theta.sin_cos();
            let sy = rs * m[(1, 0)] + rc * m[(1, 1)];
            let cy = if rs != 0.0 {
                (m[(1, 1)] - sy * rc) / (-sy * rs)
            } else {
                (m[(1, 0)] - sy * rs) / (sy * rc)
            };
            FirstOrderProperties {
                sx,
                sy,
                cx: 0.0,
                cy,
                theta,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn clockwise_quarter_turn() {
        let m = Matrix2::new(0.0, 1.0, -1.0, 0.0);
        for axis in [ShearAxis::X, ShearAxis::Y] {
            let p = calc_first_order_properties(&m, axis);
            assert!((p.sx - 1.0).abs() < 1e-9);
            assert!((p.sy - 1.0).abs() < 1e-9);
            assert!((p.theta + FRAC_PI_2).abs() < 1e-9);
            assert!(p.shear(axis).abs() < 1e-9);
        }
    }

    #[test]
    fn shear_lands_on_requested_axis() {
        // x' = x + 0.5 y
        let m = Matrix2::new(1.0, 0.5, 0.0, 1.0);
        let p = calc_first_order_properties(&m, ShearAxis::X);
        assert_eq!(p.cy, 0.0);
        assert!((p.sx - 1.0).abs() < 1e-12);
        assert!(p.theta.abs() < 1e-12);
        assert!((p.cx - 0.5).abs() < 1e-12);

        // the same matrix read with y shear picks up a rotation
        let p = calc_first_order_properties(&m, ShearAxis::Y);
        assert_eq!(p.cx, 0.0);
        assert!((p.sx - 1.25f64.sqrt()).abs() < 1e-12);
        assert!((p.sy - 1.0 / 1.25f64.sqrt()).abs() < 1e-12);
        assert!((p.cy - 0.5).abs() < 1e-12);
        assert!((p.theta + 0.5f64.atan()).abs() < 1e-12);
        assert_eq!(p.shear(ShearAxis::Y), p.cy);
    }
}
