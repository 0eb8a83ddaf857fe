//! Small numerical helpers shared by the fitting routines.

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, TransformError};
use crate::Point;

/// Checks that two point sets are non-empty correspondences of equal length.
pub(crate) fn check_correspondences(src: &[Point], dst: &[Point]) -> Result<()> {
    if src.len() != dst.len() {
        return Err(TransformError::estimation(format!(
            "shape mismatch! source has {} points, destination has {}",
            src.len(),
            dst.len()
        )));
    }
    if src.is_empty() {
        return Err(TransformError::estimation("no correspondences to fit"));
    }
    Ok(())
}

/// Centroid of a non-empty point set.
pub(crate) fn mean(points: &[Point]) -> Point {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
    [sx / n, sy / n]
}

pub(crate) fn distance(a: &Point, b: &Point) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// `|a - b| <= atol + rtol * |b|` for every coordinate.
pub(crate) fn allclose(a: &[Point], b: &[Point], atol: f64, rtol: f64) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(pa, pb)| {
            (0..2).all(|k| (pa[k] - pb[k]).abs() <= atol + rtol * pb[k].abs())
        })
}

/// Least-squares solution of `a x = b` through the SVD, treating singular
/// values below the usual machine-precision cutoff as zero.
///
/// Returns the solution together with the numerical rank of `a`.
pub(crate) fn lstsq(a: DMatrix<f64>, b: &DVector<f64>) -> Result<(DVector<f64>, usize)> {
    let cutoff = f64::EPSILON * a.nrows().max(a.ncols()) as f64;
    let svd = a.svd(true, true);
    let largest = svd.singular_values.iter().cloned().fold(0.0, f64::max);
    let eps = largest * cutoff;
    let rank = svd.rank(eps);
    let x = svd
        .solve(b, eps)
        .map_err(|e| TransformError::estimation(format!("least squares failed: {}", e)))?;
    Ok((x, rank))
}
