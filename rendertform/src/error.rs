//! Error types for transform fitting, conversion, resolution and decoding.

use thiserror::Error;

/// Main error type for the transform model.
#[derive(Error, Debug)]
pub enum TransformError {
    /// Insufficient or ill-conditioned correspondences, or an iterative
    /// fit/inversion that did not converge.
    #[error("Estimation error: {0}")]
    Estimation(String),

    /// Incompatible family or order conversion.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// A reference could not be found in the supplied reference pool.
    #[error("Resolution error: transform '{ref_id}' is not in the reference pool")]
    Resolution { ref_id: String },

    /// Malformed dataString or transform record.
    #[error("Format error: {0}")]
    Format(String),

    /// The transform class carries no implementation of the operation.
    #[error("Unsupported operation: {operation} is not available for {class_name}")]
    Unsupported {
        class_name: String,
        operation: &'static str,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for transform operations.
pub type Result<T> = std::result::Result<T, TransformError>;

impl TransformError {
    /// Create an estimation error.
    pub fn estimation(msg: impl Into<String>) -> Self {
        Self::Estimation(msg.into())
    }

    /// Create a conversion error.
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }

    /// Create a resolution error for a missing reference id.
    pub fn resolution(ref_id: impl Into<String>) -> Self {
        Self::Resolution {
            ref_id: ref_id.into(),
        }
    }

    /// Create a format error.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(class_name: impl Into<String>, operation: &'static str) -> Self {
        Self::Unsupported {
            class_name: class_name.into(),
            operation,
        }
    }
}
