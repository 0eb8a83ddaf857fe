//! Tunable parameters of the iterative algorithms.
//!
//! Every struct implements [`Default`] with the values the alignment service
//! has been validated against, and deserializes with missing fields filled
//! from those defaults, so a configuration file only needs to name what it
//! changes.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Gradient-descent parameters for the numerical inverse of a thin-plate spline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InverseConfig {
    /// Step size as a fraction of the current residual.
    pub gamma: f64,
    /// Stop once a step moves the estimate less than this distance.
    pub precision: f64,
    /// Hard iteration cap per point.
    pub max_iters: usize,
}

impl Default for InverseConfig {
    fn default() -> Self {
        InverseConfig {
            gamma: 1.0,
            precision: 1e-4,
            max_iters: 1000,
        }
    }
}

/// Parameters of the adaptive control-point reduction of a thin-plate spline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshRefineConfig {
    /// Refinement starts from a `starting_grid` x `starting_grid` lattice.
    pub starting_grid: usize,
    /// Whether the reduced spline carries an affine block.
    pub compute_affine: bool,
    /// Maximum allowed distance, in pixels, between the reduced and original spline.
    pub tol: f64,
    /// Maximum number of refinement rounds.
    pub max_iter: usize,
    /// Maximum number of control points added per round.
    pub nworst: usize,
}

impl Default for MeshRefineConfig {
    fn default() -> Self {
        MeshRefineConfig {
            starting_grid: 7,
            compute_affine: true,
            tol: 1.0,
            max_iter: 50,
            nworst: 10,
        }
    }
}

/// Validation and retry policy of polynomial fitting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolynomialFitConfig {
    /// Re-apply the fitted polynomial to the source points and require it
    /// to reproduce the destination points.
    pub test_coords: bool,
    /// Fit attempts before giving up with an estimation error.
    pub max_tries: usize,
    /// Absolute tolerance of the reproduction check.
    pub atol: f64,
    /// Relative tolerance of the reproduction check.
    pub rtol: f64,
}

impl Default for PolynomialFitConfig {
    fn default() -> Self {
        PolynomialFitConfig {
            test_coords: true,
            max_tries: 100,
            atol: 1e-3,
            rtol: 0.0,
        }
    }
}

/// Limits of tree evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Maximum number of nested reference hops before evaluation gives up.
    pub max_reference_depth: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            max_reference_depth: 64,
        }
    }
}

/// All tunables in one document, as read by the command line tool.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Spline inverse iteration.
    pub inverse: InverseConfig,
    /// Spline control point reduction.
    pub mesh_refine: MeshRefineConfig,
    /// Polynomial validation and retries.
    pub polynomial_fit: PolynomialFitConfig,
    /// Tree evaluation limits.
    pub evaluator: EvaluatorConfig,
}

impl TransformConfig {
    /// Parses a JSON configuration document; absent keys keep their defaults.
    ///
    /// # Examples
    /// ```
    /// use rendertform::config::TransformConfig;
    /// let config = TransformConfig::from_json_str(r#"{"inverse": {"max_iters": 50}}"#).unwrap();
    /// assert_eq!(config.inverse.max_iters, 50);
    /// assert_eq!(config.inverse.gamma, 1.0);
    /// assert_eq!(config.mesh_refine.starting_grid, 7);
    /// ```
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
