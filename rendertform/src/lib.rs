//! # rendertform Library
//!
//! The `rendertform` library models the 2D coordinate transforms attached to
//! image tiles by a render/alignment service: the parametric transform
//! families, fitting them from point correspondences, the tree used to
//! compose many transforms per tile, and the exact JSON / `dataString`
//! encoding the service reads and writes.
//!
//! ## Overview of Modules
//!
//! - **`affine_model`**: `AffineModel` and its translation, rigid and
//!   similarity flavors. Least-squares and Umeyama fitting, closed-form
//!   inversion and concatenation.
//!
//! - **`polynomial_transform`**: `Polynomial2DTransform`, a 2D polynomial of
//!   arbitrary order fitted by total least squares, with order promotion
//!   (`asorder`) and conversion from affines.
//!
//! - **`nonlinear_transform`**: `NonLinearCoordinateTransform`, the kernel
//!   expansion model used for lens correction.
//!
//! - **`thin_plate_spline`**: `ThinPlateSplineTransform`, a radial-basis
//!   deformation with an optional affine part, a numerical inverse and the
//!   base64 `dataString` encoding.
//!
//! - **`tps_mesh_refinement`** (private): adaptive reduction of the control
//!   points of a thin-plate spline.
//!
//! - **`leaf_transform`**: `LeafTransform`, one model plus its id and labels,
//!   dispatched by class name. Unknown classes are kept as opaque leaves.
//!
//! - **`transform_spec`**: the `TransformSpec` tree (leaf, list, reference,
//!   interpolation) and its JSON record.
//!
//! - **`reference_pool`**: `ReferencePool`, the shared transforms that
//!   reference nodes point to.
//!
//! - **`evaluator`**: maps point sets through a tree, forwards or inverse.
//!
//! - **`reduction`**: `estimate_transformsum`, replacing a chain by one
//!   fitted leaf.
//!
//! - **`config`**: tunables of the iterative algorithms, loadable from JSON.
//!
//! - **`first_order`**, **`data_string`**, **`error`**: scale/shear/rotation
//!   decomposition, `dataString` text and binary helpers, and the error type.

pub mod affine_model;
pub mod config;
pub mod data_string;
pub mod error;
pub mod evaluator;
pub mod first_order;
pub mod leaf_transform;
pub mod nonlinear_transform;
pub mod polynomial_transform;
pub mod reduction;
pub mod reference_pool;
pub mod thin_plate_spline;
pub mod transform_spec;

// Internal Modules
mod linalg;
mod tps_mesh_refinement;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A 2D point `[x, y]`.
pub type Point = [f64; 2];

pub use error::{Result, TransformError};
pub use evaluator::{evaluate, Evaluator};
pub use leaf_transform::{LeafKind, LeafTransform};
pub use reduction::estimate_transformsum;
pub use reference_pool::ReferencePool;
pub use transform_spec::TransformSpec;
