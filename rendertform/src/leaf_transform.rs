use std::fmt;

use log::info;

use crate::affine_model::{AffineFlavor, AffineModel};
use crate::config::InverseConfig;
use crate::error::{Result, TransformError};
use crate::nonlinear_transform::{NonLinearCoordinateTransform, NonLinearFlavor};
use crate::polynomial_transform::{Polynomial2DTransform, POLYNOMIAL_CLASS_NAME};
use crate::thin_plate_spline::{ThinPlateSplineTransform, THIN_PLATE_SPLINE_CLASS_NAME};
use crate::Point;

/// The concrete model behind a leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafKind {
    Affine(AffineModel),
    Polynomial(Polynomial2DTransform),
    NonLinear(NonLinearCoordinateTransform),
    ThinPlateSpline(ThinPlateSplineTransform),
    /// A class this library has no model for; kept verbatim so it can be
    /// written back out unchanged.
    Opaque {
        class_name: String,
        data_string: String,
    },
}

/// A single parametric transform with its optional id and labels.
///
/// # Examples
/// ```
/// use rendertform::leaf_transform::LeafTransform;
/// let leaf = LeafTransform::from_class_name(
///     "mpicbg.trakem2.transform.TranslationModel2D",
///     "10.0 -2.5",
/// ).unwrap();
/// assert!(leaf.is_affine());
/// assert_eq!(leaf.tform(&[[1.0, 1.0]]).unwrap(), vec![[11.0, -1.5]]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LeafTransform {
    /// The model and its class.
    pub kind: LeafKind,
    /// Optional identifier, written as `id` in JSON.
    pub id: Option<String>,
    /// Free-form tags from `metaData.labels`.
    pub labels: Option<Vec<String>>,
}

impl LeafTransform {
    pub fn new(kind: LeafKind) -> Self {
        LeafTransform {
            kind,
            id: None,
            labels: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Decodes a leaf from its class name and dataString. Unknown class names
    /// produce an [`LeafKind::Opaque`] leaf.
    pub fn from_class_name(class_name: &str, data_string: &str) -> Result<Self> {
        let kind = if let Some(flavor) = AffineFlavor::from_class_name(class_name) {
            LeafKind::Affine(AffineModel::from_data_string(flavor, data_string)?)
        } else if let Some(flavor) = NonLinearFlavor::from_class_name(class_name) {
            LeafKind::NonLinear(NonLinearCoordinateTransform::from_data_string(flavor, data_string)?)
        } else if class_name == POLYNOMIAL_CLASS_NAME {
            LeafKind::Polynomial(Polynomial2DTransform::from_data_string(data_string)?)
        } else if class_name == THIN_PLATE_SPLINE_CLASS_NAME {
            LeafKind::ThinPlateSpline(ThinPlateSplineTransform::from_data_string(data_string)?)
        } else {
            info!(
                "Leaf transform class {} not defined in transform module, using generic",
                class_name
            );
            LeafKind::Opaque {
                class_name: class_name.to_string(),
                data_string: data_string.to_string(),
            }
        };
        Ok(LeafTransform::new(kind))
    }

    pub fn class_name(&self) -> &str {
        match &self.kind {
            LeafKind::Affine(am) => am.class_name(),
            LeafKind::Polynomial(_) => POLYNOMIAL_CLASS_NAME,
            LeafKind::NonLinear(nl) => nl.class_name(),
            LeafKind::ThinPlateSpline(_) => THIN_PLATE_SPLINE_CLASS_NAME,
            LeafKind::Opaque { class_name, .. } => class_name.as_str(),
        }
    }

    pub fn data_string(&self) -> String {
        match &self.kind {
            LeafKind::Affine(am) => am.data_string(),
            LeafKind::Polynomial(pt) => pt.data_string(),
            LeafKind::NonLinear(nl) => nl.data_string(),
            LeafKind::ThinPlateSpline(tps) => tps.data_string(),
            LeafKind::Opaque { data_string, .. } => data_string.clone(),
        }
    }

    /// True for every member of the affine family.
    pub fn is_affine(&self) -> bool {
        matches!(self.kind, LeafKind::Affine(_))
    }

    pub fn as_affine(&self) -> Option<&AffineModel> {
        match &self.kind {
            LeafKind::Affine(am) => Some(am),
            _ => None,
        }
    }

    pub fn tform(&self, points: &[Point]) -> Result<Vec<Point>> {
        match &self.kind {
            LeafKind::Affine(am) => Ok(am.tform(points)),
            LeafKind::Polynomial(pt) => Ok(pt.tform(points)),
            LeafKind::NonLinear(nl) => Ok(nl.tform(points)),
            LeafKind::ThinPlateSpline(tps) => Ok(tps.tform(points)),
            LeafKind::Opaque { class_name, .. } => {
                Err(TransformError::unsupported(class_name.as_str(), "tform"))
            }
        }
    }

    /// Maps `points` through the inverse of this leaf. Only the affine family
    /// (closed form) and thin-plate splines (numerically, per `config`) are
    /// invertible.
    pub fn inverse_tform(&self, points: &[Point], config: &InverseConfig) -> Result<Vec<Point>> {
        match &self.kind {
            LeafKind::Affine(am) => am.inverse_tform(points),
            LeafKind::ThinPlateSpline(tps) => tps.inverse_tform(points, config),
            _ => Err(TransformError::unsupported(self.class_name(), "inverse_tform")),
        }
    }
}

impl fmt::Display for LeafTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "className:{}\ndataString:{}", self.class_name(), self.data_string())
    }
}

impl From<AffineModel> for LeafTransform {
    fn from(am: AffineModel) -> Self {
        LeafTransform::new(LeafKind::Affine(am))
    }
}

impl From<Polynomial2DTransform> for LeafTransform {
    fn from(pt: Polynomial2DTransform) -> Self {
        LeafTransform::new(LeafKind::Polynomial(pt))
    }
}

impl From<NonLinearCoordinateTransform> for LeafTransform {
    fn from(nl: NonLinearCoordinateTransform) -> Self {
        LeafTransform::new(LeafKind::NonLinear(nl))
    }
}

impl From<ThinPlateSplineTransform> for LeafTransform {
    fn from(tps: ThinPlateSplineTransform) -> Self {
        LeafTransform::new(LeafKind::ThinPlateSpline(tps))
    }
}
