//! Shared utilities: error types, logging setup, evaluation metrics.

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{Result, RetinaError};
pub use metrics::EvaluationMetrics;
