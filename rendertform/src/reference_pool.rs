use std::collections::HashMap;

use crate::error::{Result, TransformError};
use crate::transform_spec::TransformSpec;

/// Shared transforms addressed by id, as listed next to the tiles of a
/// resolved-tiles record. Reference nodes are resolved against a pool passed
/// explicitly to the evaluator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferencePool {
    transforms: HashMap<String, TransformSpec>,
}

impl ReferencePool {
    pub fn new() -> Self {
        ReferencePool::default()
    }

    /// Indexes every spec carrying an id. Specs without an id are skipped.
    ///
    /// Fails with a format error if two specs share an id.
    pub fn from_specs(specs: impl IntoIterator<Item = TransformSpec>) -> Result<Self> {
        let mut pool = ReferencePool::new();
        for spec in specs {
            if let Some(id) = spec.id().map(str::to_string) {
                pool.insert(id, spec)?;
            }
        }
        Ok(pool)
    }

    /// Adds `spec` under `id`; an id may only be registered once.
    pub fn insert(&mut self, id: impl Into<String>, spec: TransformSpec) -> Result<()> {
        let id = id.into();
        if self.transforms.contains_key(&id) {
            return Err(TransformError::format(format!(
                "duplicate transform id '{}' in reference pool",
                id
            )));
        }
        self.transforms.insert(id, spec);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&TransformSpec> {
        self.transforms.get(id)
    }

    /// Looks up `id`, failing with a resolution error naming it.
    pub fn resolve(&self, id: &str) -> Result<&TransformSpec> {
        self.get(id).ok_or_else(|| TransformError::resolution(id))
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}
