use log::warn;

use crate::config::{EvaluatorConfig, InverseConfig};
use crate::error::{Result, TransformError};
use crate::reference_pool::ReferencePool;
use crate::transform_spec::TransformSpec;
use crate::Point;

/// Maps point sets through transform trees, resolving references against a
/// borrowed [`ReferencePool`].
///
/// Evaluation only reads the tree and the pool, so one evaluator can be
/// shared across threads.
///
/// # Examples
/// ```
/// use rendertform::affine_model::AffineModel;
/// use rendertform::evaluator::Evaluator;
/// use rendertform::reference_pool::ReferencePool;
/// use rendertform::transform_spec::TransformSpec;
///
/// let pool = ReferencePool::new();
/// let chain = TransformSpec::list(vec![
///     AffineModel::from_translation(1.0, 0.0).into(),
///     AffineModel::new(2.0, 0.0, 0.0, 2.0, 0.0, 0.0).into(),
/// ]);
/// let mapped = Evaluator::new(&pool).evaluate(&chain, &[[0.0, 1.0]]).unwrap();
/// assert_eq!(mapped, vec![[2.0, 2.0]]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    pool: &'a ReferencePool,
    inverse: InverseConfig,
    limits: EvaluatorConfig,
}

impl<'a> Evaluator<'a> {
    pub fn new(pool: &'a ReferencePool) -> Self {
        Evaluator {
            pool,
            inverse: InverseConfig::default(),
            limits: EvaluatorConfig::default(),
        }
    }

    pub fn with_inverse_config(mut self, inverse: InverseConfig) -> Self {
        self.inverse = inverse;
        self
    }

    pub fn with_limits(mut self, limits: EvaluatorConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn get_pool(&self) -> &'a ReferencePool {
        self.pool
    }

    pub fn get_limits(&self) -> &EvaluatorConfig {
        &self.limits
    }

    /// Maps `points` through `spec`.
    ///
    /// Leaves apply their model, lists fold their children in order,
    /// references evaluate the pooled spec and interpolations blend the
    /// results of both sides by `lambda`.
    pub fn evaluate(&self, spec: &TransformSpec, points: &[Point]) -> Result<Vec<Point>> {
        self.evaluate_at(spec, points, 0)
    }

    fn evaluate_at(&self, spec: &TransformSpec, points: &[Point], depth: usize) -> Result<Vec<Point>> {
        match spec {
            TransformSpec::Leaf(leaf) => leaf.tform(points),
            TransformSpec::List(list) => {
                let mut current = points.to_vec();
                for child in &list.tforms {
                    current = self.evaluate_at(child, &current, depth)?;
                }
                Ok(current)
            }
            TransformSpec::Reference(r) => {
                let target = self.dereference(&r.ref_id, depth)?;
                self.evaluate_at(target, points, depth + 1)
            }
            TransformSpec::Interpolated(it) => {
                let a = self.evaluate_at(&it.a, points, depth)?;
                let b = self.evaluate_at(&it.b, points, depth)?;
                let lambda = it.get_lambda();
                Ok(a.iter()
                    .zip(&b)
                    .map(|(pa, pb)| {
                        [
                            (1.0 - lambda) * pa[0] + lambda * pb[0],
                            (1.0 - lambda) * pa[1] + lambda * pb[1],
                        ]
                    })
                    .collect())
            }
        }
    }

    /// Maps `points` through the inverse of `spec`: lists are undone from
    /// the last child to the first. Interpolations have no inverse.
    pub fn evaluate_inverse(&self, spec: &TransformSpec, points: &[Point]) -> Result<Vec<Point>> {
        self.evaluate_inverse_at(spec, points, 0)
    }

    fn evaluate_inverse_at(
        &self,
        spec: &TransformSpec,
        points: &[Point],
        depth: usize,
    ) -> Result<Vec<Point>> {
        match spec {
            TransformSpec::Leaf(leaf) => leaf.inverse_tform(points, &self.inverse),
            TransformSpec::List(list) => {
                let mut current = points.to_vec();
                for child in list.tforms.iter().rev() {
                    current = self.evaluate_inverse_at(child, &current, depth)?;
                }
                Ok(current)
            }
            TransformSpec::Reference(r) => {
                let target = self.dereference(&r.ref_id, depth)?;
                self.evaluate_inverse_at(target, points, depth + 1)
            }
            TransformSpec::Interpolated(_) => Err(TransformError::unsupported(
                "InterpolatedTransform",
                "inverse_tform",
            )),
        }
    }

    fn dereference(&self, ref_id: &str, depth: usize) -> Result<&'a TransformSpec> {
        if depth >= self.limits.max_reference_depth {
            warn!(
                "reference '{}' nested deeper than {} levels; the pool is probably cyclic",
                ref_id, self.limits.max_reference_depth
            );
            return Err(TransformError::resolution(ref_id));
        }
        self.pool.resolve(ref_id)
    }
}

/// Maps `points` through `spec` with default settings, resolving references
/// in `pool`.
pub fn evaluate(spec: &TransformSpec, points: &[Point], pool: &ReferencePool) -> Result<Vec<Point>> {
    Evaluator::new(pool).evaluate(spec, points)
}
