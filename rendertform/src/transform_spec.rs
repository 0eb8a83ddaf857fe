//! The transform tree and its JSON record.
//!
//! A tile carries an ordered list of [`TransformSpec`] nodes. Nodes are
//! leaves, nested lists, references into a shared pool by id, or an
//! interpolation between two sub-trees. All nodes (de)serialize through one
//! flat record:
//!
//! ```json
//! { "type": "leaf" | "list" | "ref" | "interpolated",
//!   "className": "...", "dataString": "...", "id": "...",
//!   "metaData": { "labels": ["..."] },
//!   "specList": [ ... ], "refId": "...",
//!   "a": { ... }, "b": { ... }, "lambda": 0.5 }
//! ```
//!
//! A record without `type` is a leaf.

use serde::{Deserialize, Serialize};

use crate::affine_model::AffineModel;
use crate::error::{Result, TransformError};
use crate::leaf_transform::LeafTransform;

/// An ordered sequence of transforms applied left to right.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransformList {
    /// Children, first applied first.
    pub tforms: Vec<TransformSpec>,
    pub id: Option<String>,
}

/// A placeholder resolved by id against a reference pool at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceTransform {
    /// Id of the pooled transform this stands for.
    pub ref_id: String,
}

/// The blend `(1 - lambda) * a(p) + lambda * b(p)`.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedTransform {
    /// Transform weighted by `1 - lambda`.
    pub a: Box<TransformSpec>,
    /// Transform weighted by `lambda`.
    pub b: Box<TransformSpec>,
    lambda: f64,
}

impl InterpolatedTransform {
    /// Fails with a format error unless `lambda` lies in `[0, 1]`.
    pub fn new(a: TransformSpec, b: TransformSpec, lambda: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&lambda) {
            return Err(TransformError::format(format!(
                "interpolation weight {} is outside [0, 1]",
                lambda
            )));
        }
        Ok(InterpolatedTransform {
            a: Box::new(a),
            b: Box::new(b),
            lambda,
        })
    }

    pub fn get_lambda(&self) -> f64 {
        self.lambda
    }
}

/// A node of the transform tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TransformRecord", into = "TransformRecord")]
pub enum TransformSpec {
    Leaf(LeafTransform),
    List(TransformList),
    Reference(ReferenceTransform),
    Interpolated(InterpolatedTransform),
}

impl TransformSpec {
    pub fn list(tforms: Vec<TransformSpec>) -> Self {
        TransformSpec::List(TransformList { tforms, id: None })
    }

    pub fn reference(ref_id: impl Into<String>) -> Self {
        TransformSpec::Reference(ReferenceTransform {
            ref_id: ref_id.into(),
        })
    }

    pub fn interpolated(a: TransformSpec, b: TransformSpec, lambda: f64) -> Result<Self> {
        Ok(TransformSpec::Interpolated(InterpolatedTransform::new(a, b, lambda)?))
    }

    /// The id under which this node can be shared, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            TransformSpec::Leaf(leaf) => leaf.id.as_deref(),
            TransformSpec::List(list) => list.id.as_deref(),
            _ => None,
        }
    }

    /// Leaves of this tree in application order. References are not followed
    /// and interpolations contribute the leaves of both sides.
    pub fn leaves(&self) -> Vec<&LeafTransform> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a LeafTransform>) {
        match self {
            TransformSpec::Leaf(leaf) => out.push(leaf),
            TransformSpec::List(list) => list.tforms.iter().for_each(|t| t.collect_leaves(out)),
            TransformSpec::Reference(_) => {}
            TransformSpec::Interpolated(it) => {
                it.a.collect_leaves(out);
                it.b.collect_leaves(out);
            }
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl TransformList {
    /// Folds a list made only of affine leaves (nested lists allowed) into
    /// one model. The list `[a, b]` gives `b.concatenate(&a)`.
    ///
    /// Returns `None` if the list holds anything but affine leaves.
    ///
    /// # Examples
    /// ```
    /// use rendertform::affine_model::AffineModel;
    /// use rendertform::transform_spec::{TransformList, TransformSpec};
    /// let a = AffineModel::from_translation(1.0, 0.0);
    /// let b = AffineModel::new(2.0, 0.0, 0.0, 2.0, 0.0, 0.0);
    /// let list = TransformList { tforms: vec![a.into(), b.into()], id: None };
    /// let combined = list.concatenated_affine().unwrap();
    /// assert_eq!(combined.tform(&[[0.0, 0.0]]), vec![[2.0, 0.0]]);
    /// ```
    pub fn concatenated_affine(&self) -> Option<AffineModel> {
        self.tforms.iter().try_fold(AffineModel::identity(), |acc, t| match t {
            TransformSpec::Leaf(leaf) => leaf.as_affine().map(|am| am.concatenate(&acc)),
            TransformSpec::List(list) => list.concatenated_affine().map(|am| am.concatenate(&acc)),
            _ => None,
        })
    }
}

impl From<LeafTransform> for TransformSpec {
    fn from(leaf: LeafTransform) -> Self {
        TransformSpec::Leaf(leaf)
    }
}

impl From<AffineModel> for TransformSpec {
    fn from(am: AffineModel) -> Self {
        TransformSpec::Leaf(am.into())
    }
}

impl From<TransformList> for TransformSpec {
    fn from(list: TransformList) -> Self {
        TransformSpec::List(list)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MetaData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    labels: Option<Vec<String>>,
}

/// Wire form shared by every node type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransformRecord {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta_data: Option<MetaData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    spec_list: Option<Vec<TransformSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ref_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    a: Option<Box<TransformSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    b: Option<Box<TransformSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lambda: Option<f64>,
}

fn required<T>(value: Option<T>, node_type: &str, field: &str) -> Result<T> {
    value.ok_or_else(|| {
        TransformError::format(format!("{} transform record is missing '{}'", node_type, field))
    })
}

impl TryFrom<TransformRecord> for TransformSpec {
    type Error = TransformError;

    fn try_from(record: TransformRecord) -> Result<Self> {
        let node_type = record.node_type.as_deref().unwrap_or("leaf");
        match node_type {
            "leaf" => {
                let class_name = required(record.class_name, node_type, "className")?;
                let data_string = required(record.data_string, node_type, "dataString")?;
                let mut leaf = LeafTransform::from_class_name(&class_name, &data_string)?;
                leaf.id = record.id;
                leaf.labels = record.meta_data.and_then(|md| md.labels);
                Ok(TransformSpec::Leaf(leaf))
            }
            "list" => Ok(TransformSpec::List(TransformList {
                tforms: required(record.spec_list, node_type, "specList")?,
                id: record.id,
            })),
            "ref" => Ok(TransformSpec::reference(required(
                record.ref_id,
                node_type,
                "refId",
            )?)),
            "interpolated" => {
                let a = required(record.a, node_type, "a")?;
                let b = required(record.b, node_type, "b")?;
                let lambda = required(record.lambda, node_type, "lambda")?;
                TransformSpec::interpolated(*a, *b, lambda)
            }
            other => Err(TransformError::format(format!(
                "Unknown Transform Type {}",
                other
            ))),
        }
    }
}

impl From<TransformSpec> for TransformRecord {
    fn from(spec: TransformSpec) -> Self {
        match spec {
            TransformSpec::Leaf(leaf) => TransformRecord {
                node_type: Some("leaf".to_string()),
                class_name: Some(leaf.class_name().to_string()),
                data_string: Some(leaf.data_string()),
                meta_data: leaf.labels.map(|labels| MetaData {
                    labels: Some(labels),
                }),
                id: leaf.id,
                ..TransformRecord::default()
            },
            TransformSpec::List(list) => TransformRecord {
                node_type: Some("list".to_string()),
                spec_list: Some(list.tforms),
                id: list.id,
                ..TransformRecord::default()
            },
            TransformSpec::Reference(r) => TransformRecord {
                node_type: Some("ref".to_string()),
                ref_id: Some(r.ref_id),
                ..TransformRecord::default()
            },
            TransformSpec::Interpolated(it) => TransformRecord {
                node_type: Some("interpolated".to_string()),
                lambda: Some(it.lambda),
                a: Some(it.a),
                b: Some(it.b),
                ..TransformRecord::default()
            },
        }
    }
}
