use log::debug;

use crate::affine_model::{AffineFlavor, AffineModel};
use crate::config::{EvaluatorConfig, PolynomialFitConfig};
use crate::error::{Result, TransformError};
use crate::evaluator::Evaluator;
use crate::leaf_transform::LeafTransform;
use crate::polynomial_transform::Polynomial2DTransform;
use crate::reference_pool::ReferencePool;
use crate::transform_spec::{TransformList, TransformSpec};
use crate::Point;

/// Whether every leaf reachable from `spec` belongs to the affine family,
/// following references through `pool`.
fn all_affine(spec: &TransformSpec, pool: &ReferencePool, depth: usize, limits: &EvaluatorConfig) -> Result<bool> {
    match spec {
        TransformSpec::Leaf(leaf) => Ok(leaf.is_affine()),
        TransformSpec::List(list) => {
            for child in &list.tforms {
                if !all_affine(child, pool, depth, limits)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        TransformSpec::Reference(r) => {
            if depth >= limits.max_reference_depth {
                return Err(TransformError::resolution(r.ref_id.as_str()));
            }
            all_affine(pool.resolve(&r.ref_id)?, pool, depth + 1, limits)
        }
        TransformSpec::Interpolated(it) => {
            Ok(all_affine(&it.a, pool, depth, limits)? && all_affine(&it.b, pool, depth, limits)?)
        }
    }
}

/// Replaces a chain of transforms by a single leaf fitted on samples.
///
/// `src` is mapped through the whole `chain` (applied in order, references
/// resolved and depth-bounded by `evaluator`), and a single transform is fitted to the
/// resulting correspondences: an [`AffineModel`] if every leaf in the chain
/// is affine-family, otherwise a [`Polynomial2DTransform`] of `order`.
///
/// # Parameters
/// * `chain` - transforms to apply, first to last
/// * `src` - sample points; accuracy depends on how well they cover the domain
/// * `order` - order of the polynomial used for non-affine chains
/// * `evaluator` - reference pool and limits used to evaluate the chain
/// * `fit_config` - validation and retry policy of the polynomial fit
///
/// # Examples
/// ```
/// use rendertform::affine_model::AffineModel;
/// use rendertform::config::PolynomialFitConfig;
/// use rendertform::evaluator::Evaluator;
/// use rendertform::reduction::estimate_transformsum;
/// use rendertform::reference_pool::ReferencePool;
/// use rendertform::transform_spec::TransformSpec;
///
/// let chain: Vec<TransformSpec> = vec![
///     AffineModel::from_translation(3.0, 0.0).into(),
///     AffineModel::new(0.0, -1.0, 1.0, 0.0, 0.0, 0.0).into(),
/// ];
/// let src = vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [2.0, 3.0]];
/// let pool = ReferencePool::new();
/// let evaluator = Evaluator::new(&pool);
/// let leaf = estimate_transformsum(&chain, &src, 2, &evaluator, &PolynomialFitConfig::default())
///     .unwrap();
/// let am = leaf.as_affine().unwrap();
/// assert!((am.b1 - 3.0).abs() < 1e-9);
/// ```
pub fn estimate_transformsum(
    chain: &[TransformSpec],
    src: &[Point],
    order: usize,
    evaluator: &Evaluator,
    fit_config: &PolynomialFitConfig,
) -> Result<LeafTransform> {
    let list = TransformSpec::List(TransformList {
        tforms: chain.to_vec(),
        id: None,
    });
    let dst = evaluator.evaluate(&list, src)?;

    if all_affine(&list, evaluator.get_pool(), 0, evaluator.get_limits())? {
        debug!("reducing an affine chain of {} transforms", chain.len());
        let am = AffineModel::fit(AffineFlavor::Affine, src, &dst)?;
        return Ok(am.into());
    }
    debug!(
        "reducing a chain of {} transforms to a polynomial of order {}",
        chain.len(),
        order
    );
    Ok(Polynomial2DTransform::estimate(src, &dst, order, fit_config)?.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf_transform::LeafKind;

    fn samples() -> Vec<Point> {
        let mut pts = Vec::new();
        for i in 0..7 {
            for j in 0..7 {
                pts.push([i as f64 / 6.0, j as f64 / 6.0]);
            }
        }
        pts
    }

    #[test]
    fn referenced_affines_stay_affine() {
        let mut pool = ReferencePool::new();
        pool.insert("scale", AffineModel::new(2.0, 0.0, 0.0, 2.0, 0.0, 0.0).into())
            .unwrap();
        let chain = vec![
            TransformSpec::reference("scale"),
            AffineModel::from_rigid(0.2, 1.0, 1.0).into(),
        ];
        let leaf = estimate_transformsum(
            &chain,
            &samples(),
            2,
            &Evaluator::new(&pool),
            &PolynomialFitConfig::default(),
        )
        .unwrap();
        let am = leaf.as_affine().unwrap();
        assert!((am.scale().0 - 2.0).abs() < 1e-9);
        assert!((am.rotation() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn polynomial_in_chain_gives_polynomial() {
        let chain: Vec<TransformSpec> = vec![
            LeafTransform::from(Polynomial2DTransform::identity()).into(),
            AffineModel::from_translation(0.5, 0.25).into(),
        ];
        let pool = ReferencePool::new();
        let leaf = estimate_transformsum(
            &chain,
            &samples(),
            2,
            &Evaluator::new(&pool),
            &PolynomialFitConfig::default(),
        )
        .unwrap();
        let LeafKind::Polynomial(pt) = &leaf.kind else {
            panic!("expected a polynomial, got {}", leaf);
        };
        assert_eq!(pt.order(), 2);
        assert!((pt.translation().0 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn missing_reference_fails() {
        let chain = vec![TransformSpec::reference("nowhere")];
        let pool = ReferencePool::new();
        assert!(matches!(
            estimate_transformsum(
                &chain,
                &samples(),
                2,
                &Evaluator::new(&pool),
                &PolynomialFitConfig::default()
            ),
            Err(TransformError::Resolution { .. })
        ));
    }

    fn nested_pool() -> ReferencePool {
        let mut pool = ReferencePool::new();
        pool.insert("inner", AffineModel::from_translation(1.0, 2.0).into())
            .unwrap();
        pool.insert("outer", TransformSpec::reference("inner")).unwrap();
        pool
    }

    #[test]
    fn reference_depth_limit_applies_to_reduction() {
        let pool = nested_pool();
        let chain = vec![TransformSpec::reference("outer")];
        let fit = PolynomialFitConfig::default();

        let leaf = estimate_transformsum(&chain, &samples(), 2, &Evaluator::new(&pool), &fit).unwrap();
        assert!((leaf.as_affine().unwrap().b1 - 2.0).abs() < 1e-9);

        let shallow = Evaluator::new(&pool).with_limits(EvaluatorConfig {
            max_reference_depth: 1,
        });
        assert!(matches!(
            estimate_transformsum(&chain, &samples(), 2, &shallow, &fit),
            Err(TransformError::Resolution { .. })
        ));
    }

    #[test]
    fn affine_check_follows_reference_limit() {
        let pool = nested_pool();
        let spec = TransformSpec::reference("outer");
        assert!(all_affine(&spec, &pool, 0, &EvaluatorConfig::default()).unwrap());
        let shallow = EvaluatorConfig {
            max_reference_depth: 1,
        };
        assert!(all_affine(&spec, &pool, 0, &shallow).is_err());
    }
}
