//! Training configuration, state machine types, and progress reporting.

pub mod orchestrator;

pub use orchestrator::{TrainingOrchestrator, TrainingOutcome};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::utils::{Result, RetinaError};

/// Minimum labeled samples required before a run may start
pub const MIN_TRAINING_SAMPLES: usize = 10;

/// Hyperparameters and run controls for one training job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Optimizer name recorded on the version, e.g. "sgd"
    pub optimizer: String,
    /// Loss name recorded on the version
    pub loss: String,
    pub early_stopping: bool,
    /// Epochs without validation-loss improvement before stopping
    pub patience: usize,
    /// Minimum labeled samples required to start
    pub min_samples: usize,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            learning_rate: 0.001,
            optimizer: "sgd".to_string(),
            loss: "categorical_crossentropy".to_string(),
            early_stopping: true,
            patience: 3,
            min_samples: MIN_TRAINING_SAMPLES,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Rejects configurations that cannot produce a run.
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(RetinaError::Config("epochs must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(RetinaError::Config(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.learning_rate <= 0.0 || !self.learning_rate.is_finite() {
            return Err(RetinaError::Config(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.early_stopping && self.patience == 0 {
            return Err(RetinaError::Config(
                "early stopping patience must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle of one training run.
///
/// `Idle -> Preparing -> Running`, then exactly one of the three terminal
/// states. There are no other transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingState {
    Idle,
    Preparing,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl TrainingState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrainingState::Completed | TrainingState::Failed | TrainingState::Stopped
        )
    }
}

/// Per-epoch progress snapshot, emitted in strictly increasing epoch order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingProgress {
    /// 1-based completed epoch
    pub epoch: usize,
    pub total_epochs: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub elapsed_secs: f64,
    pub estimated_remaining_secs: f64,
}

/// Cooperative stop signal checked by the orchestrator at epoch boundaries.
///
/// Cloning shares the underlying flag, so a handle given out before the run
/// can stop it from another thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clears the flag. The orchestrator calls this when a run terminates
    /// so a stop request only ever applies to one run.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(TrainingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_epochs_rejected() {
        let config = TrainingConfig {
            epochs: 0,
            ..TrainingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_learning_rate_rejected() {
        for lr in [0.0, -0.1, f32::NAN] {
            let config = TrainingConfig {
                learning_rate: lr,
                ..TrainingConfig::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_stop_handle_shared() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_stop_requested());
        handle.request_stop();
        assert!(clone.is_stop_requested());
    }

    #[test]
    fn test_terminal_states() {
        assert!(TrainingState::Completed.is_terminal());
        assert!(TrainingState::Failed.is_terminal());
        assert!(TrainingState::Stopped.is_terminal());
        assert!(!TrainingState::Running.is_terminal());
        assert!(!TrainingState::Idle.is_terminal());
    }
}
