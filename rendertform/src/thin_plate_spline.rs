use log::debug;
use nalgebra::{DMatrix, Matrix2, Vector2};

use crate::config::InverseConfig;
use crate::data_string::{decode_f64_block, encode_f64_block, fields, parse_count};
use crate::error::{Result, TransformError};
use crate::linalg::{check_correspondences, distance};
use crate::Point;

pub const THIN_PLATE_SPLINE_CLASS_NAME: &str = "mpicbg.trakem2.transform.ThinPlateSplineTransform";

const KERNEL_NAME: &str = "ThinPlateSplineR2LogR";
const NDIMS: usize = 2;

/// Radial basis `r² ln r`, taken as zero for `r <= 1e-8`.
fn kernel(r: f64) -> f64 {
    if r > 1e-8 {
        r * r * r.ln()
    } else {
        0.0
    }
}

/// Evenly spaced values from `start` to `stop` inclusive.
fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..n)
            .map(|i| start + (stop - start) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

/// A regular `n x n` lattice spanning the box from `min` to `max`, row by row.
///
/// # Examples
/// ```
/// use rendertform::thin_plate_spline::linspace_grid;
/// let grid = linspace_grid([0.0, 0.0], [10.0, 4.0], 3);
/// assert_eq!(grid.len(), 9);
/// assert_eq!(grid[1], [5.0, 0.0]);
/// assert_eq!(grid[8], [10.0, 4.0]);
/// ```
pub fn linspace_grid(min: Point, max: Point, n: usize) -> Vec<Point> {
    let xs = linspace(min[0], max[0], n);
    let ys = linspace(min[1], max[1], n);
    ys.iter()
        .flat_map(|y| xs.iter().map(move |x| [*x, *y]))
        .collect()
}

/// Global affine component of a spline: `a_mtx[out][in]` and `b_vec[out]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplineAffine {
    /// Linear part, indexed `[out][in]`.
    pub a_mtx: Matrix2<f64>,
    /// Translation.
    pub b_vec: Vector2<f64>,
}

/// A 2D thin-plate spline:
///
/// ```text
///   f(p) = p + Σ_k U(|p - c_k|) d_k + A p + b,   U(r) = r² ln r
/// ```
///
/// with control points `c_k` (`src_pts`), RBF coefficients `d_k` (the
/// columns of the 2 x nLm `d_mtx_dat`) and an optional affine part.
#[derive(Debug, Clone, PartialEq)]
pub struct ThinPlateSplineTransform {
    src_pts: Vec<Point>,
    d_mtx_dat: DMatrix<f64>,
    affine: Option<SplineAffine>,
}

impl Default for ThinPlateSplineTransform {
    fn default() -> Self {
        ThinPlateSplineTransform {
            src_pts: Vec::new(),
            d_mtx_dat: DMatrix::zeros(NDIMS, 0),
            affine: None,
        }
    }
}

impl ThinPlateSplineTransform {
    /// Assembles a spline from its parts. `d_mtx_dat` must be 2 x `src_pts.len()`.
    pub fn new(
        src_pts: Vec<Point>,
        d_mtx_dat: DMatrix<f64>,
        affine: Option<SplineAffine>,
    ) -> Result<Self> {
        if d_mtx_dat.nrows() != NDIMS || d_mtx_dat.ncols() != src_pts.len() {
            return Err(TransformError::format(format!(
                "{} control points need a 2x{} coefficient matrix, got {}x{}",
                src_pts.len(),
                src_pts.len(),
                d_mtx_dat.nrows(),
                d_mtx_dat.ncols()
            )));
        }
        Ok(ThinPlateSplineTransform {
            src_pts,
            d_mtx_dat,
            affine,
        })
    }

    pub fn get_ndims(&self) -> usize {
        NDIMS
    }

    pub fn get_n_lm(&self) -> usize {
        self.src_pts.len()
    }

    pub fn get_src_pts(&self) -> &[Point] {
        &self.src_pts
    }

    pub fn get_d_mtx_dat(&self) -> &DMatrix<f64> {
        &self.d_mtx_dat
    }

    pub fn get_affine(&self) -> Option<&SplineAffine> {
        self.affine.as_ref()
    }

    pub fn apply(&self, p: Point) -> Point {
        let mut out = p;
        for (k, c) in self.src_pts.iter().enumerate() {
            let u = kernel(distance(&p, c));
            if u != 0.0 {
                out[0] += u * self.d_mtx_dat[(0, k)];
                out[1] += u * self.d_mtx_dat[(1, k)];
            }
        }
        if let Some(affine) = &self.affine {
            let ap = affine.a_mtx * Vector2::new(p[0], p[1]) + affine.b_vec;
            out[0] += ap[0];
            out[1] += ap[1];
        }
        out
    }

    pub fn tform(&self, points: &[Point]) -> Vec<Point> {
        points.iter().map(|p| self.apply(*p)).collect()
    }

    /// Numerical inverse of one point by fixed-step gradient descent,
    /// `p <- p - gamma * (f(p) - target)`, starting from the target itself.
    pub fn gradient_descent(&self, target: Point, config: &InverseConfig) -> Result<Point> {
        let mut cur = target;
        for iteration in 1..=config.max_iters {
            let f = self.apply(cur);
            let next = [
                cur[0] - config.gamma * (f[0] - target[0]),
                cur[1] - config.gamma * (f[1] - target[1]),
            ];
            let step = distance(&next, &cur);
            cur = next;
            if step <= config.precision {
                if iteration > 100 {
                    debug!("spline inverse converged slowly, in {} iterations", iteration);
                }
                return Ok(cur);
            }
        }
        Err(TransformError::estimation(format!(
            "gradient descent for inversion of ThinPlateSpline reached maximum iterations: {}",
            config.max_iters
        )))
    }

    /// Maps `points` through the numerical inverse of this spline.
    pub fn inverse_tform(&self, points: &[Point], config: &InverseConfig) -> Result<Vec<Point>> {
        points
            .iter()
            .map(|p| self.gradient_descent(*p, config))
            .collect()
    }

    /// Fits a spline interpolating `src -> dst`.
    ///
    /// For every output coordinate the system `[[K, P], [Pᵀ, 0]] w = [dst - src; 0]`
    /// is solved, with `K[i][j] = U(|src_i - src_j|)` and `P[i] = [x_i, y_i, 1]`.
    /// Without `compute_affine` only `K w = dst - src` is solved.
    pub fn fit(src: &[Point], dst: &[Point], compute_affine: bool) -> Result<Self> {
        check_correspondences(src, dst)?;
        let n = src.len();
        let size = if compute_affine { n + NDIMS + 1 } else { n };

        let mut l = DMatrix::<f64>::zeros(size, size);
        for i in 0..n {
            for j in (i + 1)..n {
                let u = kernel(distance(&src[i], &src[j]));
                l[(i, j)] = u;
                l[(j, i)] = u;
            }
            if compute_affine {
                for (c, value) in [src[i][0], src[i][1], 1.0].into_iter().enumerate() {
                    l[(i, n + c)] = value;
                    l[(n + c, i)] = value;
                }
            }
        }
        let mut y = DMatrix::<f64>::zeros(size, NDIMS);
        for (i, (s, d)) in src.iter().zip(dst).enumerate() {
            y[(i, 0)] = d[0] - s[0];
            y[(i, 1)] = d[1] - s[1];
        }

        let w = l
            .lu()
            .solve(&y)
            .filter(|w| w.iter().all(|v| v.is_finite()))
            .ok_or_else(|| {
                TransformError::estimation(format!(
                    "thin-plate spline system for {} control points is singular",
                    n
                ))
            })?;

        let d_mtx_dat = DMatrix::from_fn(NDIMS, n, |out, k| w[(k, out)]);
        let affine = compute_affine.then(|| SplineAffine {
            a_mtx: Matrix2::new(w[(n, 0)], w[(n + 1, 0)], w[(n, 1)], w[(n + 1, 1)]),
            b_vec: Vector2::new(w[(n + 2, 0)], w[(n + 2, 1)]),
        });
        Ok(ThinPlateSplineTransform {
            src_pts: src.to_vec(),
            d_mtx_dat,
            affine,
        })
    }

    /// Re-fits this spline in place.
    pub fn estimate(&mut self, src: &[Point], dst: &[Point], compute_affine: bool) -> Result<()> {
        *self = ThinPlateSplineTransform::fit(src, dst, compute_affine)?;
        Ok(())
    }

    /// Corners of the bounding box of the control points.
    pub(crate) fn control_point_bounds(&self) -> Result<(Point, Point)> {
        let first = self.src_pts.first().ok_or_else(|| {
            TransformError::estimation("thin-plate spline has no control points")
        })?;
        Ok(self.src_pts.iter().fold((*first, *first), |(mn, mx), p| {
            (
                [mn[0].min(p[0]), mn[1].min(p[1])],
                [mx[0].max(p[0]), mx[1].max(p[1])],
            )
        }))
    }

    /// A regular `n x n` lattice over the bounding box of the control points.
    pub(crate) fn control_point_lattice(&self, n: usize) -> Result<Vec<Point>> {
        let (mn, mx) = self.control_point_bounds()?;
        Ok(linspace_grid(mn, mx, n))
    }

    /// Estimates the spline that acts on coordinates multiplied by `factor`,
    /// i.e. `g(p) = factor * f(p / factor)`.
    ///
    /// # Parameters
    /// * `factor` - coordinate scale factor
    /// * `ngrid` - the equivalent spline is fitted on an `ngrid x ngrid`
    ///   lattice over the control-point bounding box
    /// * `preserve_src_pts` - fit on the existing control points instead of a lattice
    ///
    /// The affine part is kept only if this spline has one.
    pub fn scale_coordinates(&self, factor: f64, ngrid: usize, preserve_src_pts: bool) -> Result<Self> {
        let src = if preserve_src_pts {
            self.src_pts.clone()
        } else {
            self.control_point_lattice(ngrid)?
        };
        let dst = self.tform(&src);
        let scale = |pts: Vec<Point>| -> Vec<Point> {
            pts.into_iter().map(|p| [p[0] * factor, p[1] * factor]).collect()
        };
        ThinPlateSplineTransform::fit(&scale(src), &scale(dst), self.affine.is_some())
    }

    /// `ThinPlateSplineR2LogR ndims nLm <A,b | null> <src,d>`, each block
    /// base64 of big-endian doubles.
    pub fn data_string(&self) -> String {
        let block1 = match &self.affine {
            Some(affine) => {
                let a = &affine.a_mtx;
                encode_f64_block(&[
                    a[(0, 0)],
                    a[(0, 1)],
                    a[(1, 0)],
                    a[(1, 1)],
                    affine.b_vec[0],
                    affine.b_vec[1],
                ])
            }
            None => "null".to_string(),
        };
        let mut block2: Vec<f64> = self.src_pts.iter().flat_map(|p| [p[0], p[1]]).collect();
        block2.extend(self.d_mtx_dat.row(0).iter());
        block2.extend(self.d_mtx_dat.row(1).iter());
        format!(
            "{} {} {} {} {}",
            KERNEL_NAME,
            NDIMS,
            self.get_n_lm(),
            block1,
            encode_f64_block(&block2)
        )
    }

    pub fn from_data_string(data_string: &str) -> Result<Self> {
        let fields = fields(data_string);
        if fields.len() != 5 || fields[0] != KERNEL_NAME {
            return Err(TransformError::format(format!(
                "expected '{} ndims nLm <affine> <points>', got '{}'",
                KERNEL_NAME, data_string
            )));
        }
        let ndims = parse_count(fields[1], "ndims")?;
        if ndims != NDIMS {
            return Err(TransformError::format(format!(
                "only 2-dimensional splines are supported, got ndims {}",
                ndims
            )));
        }
        let n_lm = parse_count(fields[2], "nLm")?;

        let affine = if fields[3] == "null" {
            None
        } else {
            let values = decode_f64_block(fields[3])?;
            if values.len() != NDIMS * NDIMS + NDIMS {
                return Err(TransformError::format(format!(
                    "inconsistent sizes and array lengths: affine block holds {} values",
                    values.len()
                )));
            }
            Some(SplineAffine {
                a_mtx: Matrix2::new(values[0], values[1], values[2], values[3]),
                b_vec: Vector2::new(values[4], values[5]),
            })
        };

        let values = decode_f64_block(fields[4])?;
        if n_lm.checked_mul(2 * NDIMS) != Some(values.len()) {
            return Err(TransformError::format(format!(
                "inconsistent sizes and array lengths: {} values for {} landmarks",
                values.len(),
                n_lm
            )));
        }
        let (points, coefficients) = values.split_at(NDIMS * n_lm);
        let src_pts = points.chunks_exact(NDIMS).map(|c| [c[0], c[1]]).collect();
        let d_mtx_dat = DMatrix::from_row_slice(NDIMS, n_lm, coefficients);
        ThinPlateSplineTransform::new(src_pts, d_mtx_dat, affine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmarks() -> Vec<Point> {
        let mut pts = Vec::new();
        for i in 0..6 {
            for j in 0..5 {
                pts.push([i as f64 * 200.0 + 10.0, j as f64 * 250.0 - 40.0]);
            }
        }
        pts
    }

    fn warp(points: &[Point]) -> Vec<Point> {
        points
            .iter()
            .map(|p| {
                let bump = 4.0 * (-((p[0] - 500.0).powi(2) + (p[1] - 450.0).powi(2)) / 2.0e5).exp();
                [1.01 * p[0] + 0.02 * p[1] + 3.0 + bump, 0.99 * p[1] - 5.0 - bump]
            })
            .collect()
    }

    #[test]
    fn kernel_vanishes_at_zero() {
        assert_eq!(kernel(0.0), 0.0);
        assert_eq!(kernel(1.0), 0.0);
        assert!((kernel(std::f64::consts::E) - std::f64::consts::E.powi(2)).abs() < 1e-12);
    }

    #[test]
    fn fit_interpolates_control_points() {
        let src = landmarks();
        let dst = warp(&src);
        for compute_affine in [true, false] {
            let tps = ThinPlateSplineTransform::fit(&src, &dst, compute_affine).unwrap();
            assert_eq!(tps.get_n_lm(), src.len());
            assert_eq!(tps.get_affine().is_some(), compute_affine);
            for (p, q) in tps.tform(&src).iter().zip(&dst) {
                assert!((p[0] - q[0]).abs() < 1e-4 && (p[1] - q[1]).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn pure_affine_correspondences_have_no_bending() {
        let src = landmarks();
        let dst: Vec<Point> = src.iter().map(|p| [2.0 * p[0] + 1.0, p[1] - 7.0]).collect();
        let tps = ThinPlateSplineTransform::fit(&src, &dst, true).unwrap();
        assert!(tps.get_d_mtx_dat().iter().all(|d| d.abs() < 1e-9));
        let affine = tps.get_affine().unwrap();
        assert!((affine.a_mtx[(0, 0)] - 1.0).abs() < 1e-6);
        assert!((affine.b_vec[1] + 7.0).abs() < 1e-6);
    }

    #[test]
    fn duplicated_control_points_are_singular() {
        let src = vec![[0.0, 0.0], [0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let err = ThinPlateSplineTransform::fit(&src, &src, true).unwrap_err();
        assert!(matches!(err, TransformError::Estimation(_)));
    }

    #[test]
    fn inverse_undoes_forward() {
        let src = landmarks();
        let tps = ThinPlateSplineTransform::fit(&src, &warp(&src), true).unwrap();
        let checks = vec![[100.0, 100.0], [523.5, 411.0], [900.0, 870.0]];
        let back = tps
            .inverse_tform(&tps.tform(&checks), &InverseConfig::default())
            .unwrap();
        for (p, q) in checks.iter().zip(&back) {
            assert!(distance(p, q) < 1e-3, "{:?} vs {:?}", p, q);
        }
    }

    #[test]
    fn inverse_reports_iteration_cap() {
        let src = landmarks();
        let tps = ThinPlateSplineTransform::fit(&src, &warp(&src), true).unwrap();
        let config = InverseConfig {
            max_iters: 1,
            precision: 0.0,
            ..InverseConfig::default()
        };
        assert!(matches!(
            tps.inverse_tform(&[[500.0, 450.0]], &config),
            Err(TransformError::Estimation(_))
        ));
    }

    #[test]
    fn data_string_round_trip() {
        let src = landmarks();
        for compute_affine in [true, false] {
            let tps = ThinPlateSplineTransform::fit(&src, &warp(&src), compute_affine).unwrap();
            let text = tps.data_string();
            assert!(text.starts_with("ThinPlateSplineR2LogR 2 30 "));
            assert_eq!(text.contains(" null "), !compute_affine);
            assert_eq!(ThinPlateSplineTransform::from_data_string(&text).unwrap(), tps);
        }
    }

    #[test]
    fn control_points_are_interleaved_in_data_string() {
        let tps = ThinPlateSplineTransform::new(
            vec![[1.0, 2.0], [3.0, 4.0]],
            DMatrix::from_row_slice(2, 2, &[5.0, 6.0, 7.0, 8.0]),
            None,
        )
        .unwrap();
        let text = tps.data_string();
        let block = text.split_whitespace().last().unwrap();
        assert_eq!(
            decode_f64_block(block).unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
        );
    }

    #[test]
    fn malformed_data_strings() {
        let block = encode_f64_block(&[0.0; 4]);
        // 4 * nLm wraps to 8 on 64-bit targets
        assert!(matches!(
            ThinPlateSplineTransform::from_data_string(&format!(
                "ThinPlateSplineR2LogR 2 4611686018427387906 null {}",
                encode_f64_block(&[0.0; 8])
            )),
            Err(TransformError::Format(_))
        ));
        assert!(matches!(
            ThinPlateSplineTransform::from_data_string(&format!(
                "ThinPlateSplineR2LogR 2 18446744073709551615 null {}",
                block
            )),
            Err(TransformError::Format(_))
        ));
        assert!(ThinPlateSplineTransform::from_data_string(&format!(
            "ThinPlateSplineR2LogR 3 1 null {}",
            block
        ))
        .is_err());
        assert!(ThinPlateSplineTransform::from_data_string(&format!(
            "ThinPlateSplineR2LogR 2 2 null {}",
            block
        ))
        .is_err());
        assert!(ThinPlateSplineTransform::from_data_string(&format!(
            "GaussianRBF 2 1 null {}",
            block
        ))
        .is_err());
        assert!(ThinPlateSplineTransform::from_data_string(&format!(
            "ThinPlateSplineR2LogR 2 1 {} {}",
            block, block
        ))
        .is_err());
        assert!(ThinPlateSplineTransform::from_data_string(&format!(
            "ThinPlateSplineR2LogR 2 1 null {}",
            block
        ))
        .is_ok());
    }

    #[test]
    fn scaled_spline_matches_scaled_coordinates() {
        let src = landmarks();
        let tps = ThinPlateSplineTransform::fit(&src, &warp(&src), true).unwrap();
        let half = tps.scale_coordinates(0.5, 20, false).unwrap();
        assert_eq!(half.get_n_lm(), 400);
        let checks = vec![[300.0, 300.0], [610.0, 480.0], [820.0, 120.0]];
        let scaled_checks: Vec<Point> = checks.iter().map(|p| [p[0] * 0.5, p[1] * 0.5]).collect();
        for (p, q) in tps.tform(&checks).iter().zip(half.tform(&scaled_checks)) {
            assert!((p[0] * 0.5 - q[0]).abs() < 0.05 && (p[1] * 0.5 - q[1]).abs() < 0.05);
        }
        let same_points = tps.scale_coordinates(2.0, 0, true).unwrap();
        assert_eq!(same_points.get_n_lm(), src.len());
    }
}
