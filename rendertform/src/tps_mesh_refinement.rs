use kd_tree::{KdPoint, KdTree};
use log::{debug, info};

use crate::config::MeshRefineConfig;
use crate::error::{Result, TransformError};
use crate::linalg::distance;
use crate::thin_plate_spline::ThinPlateSplineTransform;
use crate::Point;

/// Candidate control points closer than this are treated as the same point.
const COINCIDENT_DISTANCE: f64 = 1e-6;

/// A candidate control point, indexed in a [KdTree] so that points already
/// in the mesh are not added twice.
#[derive(Debug, Clone, Copy, PartialEq)]
struct MeshPoint([f64; 2]);

impl KdPoint for MeshPoint {
    type Scalar = f64;
    type Dim = typenum::U2;
    fn at(&self, k: usize) -> f64 {
        self.0[k]
    }
}

impl ThinPlateSplineTransform {
    /// Estimates a spline with fewer control points that stays within
    /// `config.tol` of this one at every original control point.
    ///
    /// Refinement starts from a `starting_grid x starting_grid` lattice over
    /// the bounding box of the control points. Each round fits a trial spline
    /// to this spline's output on the current candidates, measures the error
    /// at the original control points and adds up to `config.nworst` of the
    /// worst points exceeding `config.tol`.
    ///
    /// # Returns
    /// The reduced spline, or an estimation error if it did not converge
    /// within `config.max_iter` rounds.
    pub fn adaptive_mesh_estimate(&self, config: &MeshRefineConfig) -> Result<ThinPlateSplineTransform> {
        let mut src = self.control_point_lattice(config.starting_grid)?;
        let mut dst = self.tform(&src);
        let originals = self.get_src_pts();
        let targets = self.tform(originals);

        for iteration in 0..config.max_iter {
            let trial = ThinPlateSplineTransform::fit(&src, &dst, config.compute_affine)?;
            let errors: Vec<f64> = trial
                .tform(originals)
                .iter()
                .zip(&targets)
                .map(|(p, q)| distance(p, q))
                .collect();

            let mut worst: Vec<usize> = (0..errors.len()).filter(|i| errors[*i] > config.tol).collect();
            if worst.is_empty() {
                info!(
                    "reduced spline from {} to {} control points in {} rounds",
                    originals.len(),
                    trial.get_n_lm(),
                    iteration + 1
                );
                return Ok(trial);
            }
            worst.sort_by(|a, b| errors[*b].total_cmp(&errors[*a]));

            let mesh = KdTree::build_by_ordered_float(src.iter().map(|p| MeshPoint(*p)).collect());
            let mut added = 0;
            for i in worst {
                if added == config.nworst {
                    break;
                }
                let candidate = MeshPoint(originals[i]);
                let coincident = mesh
                    .nearest(&candidate)
                    .map_or(false, |n| n.squared_distance.sqrt() < COINCIDENT_DISTANCE);
                if coincident {
                    continue;
                }
                src.push(originals[i]);
                dst.push(targets[i]);
                added += 1;
            }
            debug!(
                "mesh refinement round {}: max error {:.4}, added {} control points",
                iteration + 1,
                errors.iter().cloned().fold(0.0, f64::max),
                added
            );
            if added == 0 {
                return Err(TransformError::estimation(
                    "adaptive mesh refinement stalled: every failing point is already a control point",
                ));
            }
        }
        Err(TransformError::estimation(format!(
            "adaptive mesh refinement did not reach tolerance {} in {} iterations",
            config.tol, config.max_iter
        )))
    }
}
