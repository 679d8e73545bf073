//! Error Handling Module
//!
//! Defines custom error types for the retina-ml library.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Main error type for retina-ml operations
#[derive(Error, Debug)]
pub enum RetinaError {
    /// Split ratios are out of range or overlap the whole dataset
    #[error("Invalid split: validation {val_split} + test {test_split} must each be >= 0 and sum to < 1")]
    InvalidSplit { val_split: f32, test_split: f32 },

    /// A sample carries a label that is not in the caller-supplied class list
    #[error("Unknown label '{label}' in sample '{filename}': not in the configured class names")]
    UnknownLabel { label: String, filename: String },

    /// Too few labeled samples to start a training run
    #[error("Insufficient data: {found} labeled samples, minimum is {required}")]
    InsufficientData { found: usize, required: usize },

    /// Training reached an unrecoverable state (NaN loss, shape mismatch, ...)
    #[error("Training failed during {stage}: {reason}")]
    TrainingFailed { stage: String, reason: String },

    /// Attempted to delete the version currently serving a disease type
    #[error("Cannot delete current version {version_id} for '{disease_type}': reassign current first")]
    CannotDeleteCurrent {
        disease_type: String,
        version_id: String,
    },

    /// Inference was requested against a model that is not in the cache
    #[error("Model '{model_name}' is not ready: train and cache it before serving")]
    ModelNotReady { model_name: String },

    /// Error decoding or processing an image
    #[error("Image processing error: {0}")]
    Image(String),

    /// Model construction or artifact error
    #[error("Model error: {0}")]
    Model(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Registry lookup failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<image::ImageError> for RetinaError {
    fn from(err: image::ImageError) -> Self {
        RetinaError::Image(err.to_string())
    }
}

impl From<serde_json::Error> for RetinaError {
    fn from(err: serde_json::Error) -> Self {
        RetinaError::Serialization(err.to_string())
    }
}

/// Specialized Result type for retina-ml operations.
pub type Result<T> = std::result::Result<T, RetinaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RetinaError::InvalidSplit {
            val_split: 0.6,
            test_split: 0.5,
        };
        assert!(err.to_string().contains("0.6"));
        assert!(err.to_string().contains("0.5"));
    }

    #[test]
    fn test_unknown_label_carries_context() {
        let err = RetinaError::UnknownLabel {
            label: "melanoma".to_string(),
            filename: "img_001.png".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("melanoma"));
        assert!(msg.contains("img_001.png"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RetinaError = io_err.into();
        assert!(matches!(err, RetinaError::Io(_)));
    }
}
