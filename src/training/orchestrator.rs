//! Orchestrates one training run end to end.
//!
//! The orchestrator validates the datasets, builds a fresh classifier, and
//! drives the epoch loop: seeded batch shuffling, gradient steps, train and
//! validation evaluation, progress emission, early stopping, and cooperative
//! stop checks at epoch boundaries. A NaN loss ends the run as `Failed` with
//! the progress history collected so far; it is never retried.

use crossbeam_channel::{unbounded, Receiver, Sender};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::time::Instant;
use tracing::{info, warn};

use crate::dataset::{Tensor, TensorSet};
use crate::model::{ModelMetadata, SoftmaxClassifier};
use crate::training::{StopHandle, TrainingConfig, TrainingProgress, TrainingState};
use crate::utils::{EvaluationMetrics, Result, RetinaError};

/// Relative improvement below which a validation loss does not reset the
/// early-stopping patience counter.
const IMPROVEMENT_EPSILON: f64 = 1e-6;

/// Result of a finished run. `model` is present for `Completed` and
/// `Stopped` (partially trained), absent for `Failed`.
#[derive(Debug)]
pub struct TrainingOutcome {
    pub state: TrainingState,
    pub model: Option<SoftmaxClassifier>,
    /// One entry per completed epoch, in order
    pub history: Vec<TrainingProgress>,
    /// Validation metrics at the end of the run
    pub final_metrics: Option<EvaluationMetrics>,
    pub training_time_secs: f64,
}

/// Drives training runs and fans progress out to subscribers.
pub struct TrainingOrchestrator {
    config: TrainingConfig,
    state: TrainingState,
    subscribers: Vec<Sender<TrainingProgress>>,
    stop: StopHandle,
}

impl TrainingOrchestrator {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: TrainingState::Idle,
            subscribers: Vec::new(),
            stop: StopHandle::new(),
        })
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    /// Handle for requesting a cooperative stop from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Subscribes to per-epoch progress. Progress delivery is
    /// fire-and-forget; a dropped receiver is pruned on the next emission.
    pub fn subscribe(&mut self) -> Receiver<TrainingProgress> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Runs a full training job over the given train/validation sets.
    ///
    /// Returns `Err` only for preparation failures (bad data, too few
    /// samples). Mid-run failures such as NaN loss end the run with
    /// `TrainingState::Failed` inside the outcome so the partial history
    /// survives.
    pub fn train(&mut self, train_set: &TensorSet, val_set: &TensorSet) -> Result<TrainingOutcome> {
        self.state = TrainingState::Preparing;
        let metadata = self.prepare(train_set, val_set)?;

        let mut model = SoftmaxClassifier::new(metadata, self.config.seed)?;
        info!(
            "Starting training: {} train / {} val samples, {} epochs, {} parameters",
            train_set.len(),
            val_set.len(),
            self.config.epochs,
            model.parameter_count()
        );

        self.state = TrainingState::Running;
        let started = Instant::now();
        let mut history: Vec<TrainingProgress> = Vec::with_capacity(self.config.epochs);
        let mut best_val_loss = f64::INFINITY;
        let mut epochs_without_improvement = 0usize;
        let mut final_state = TrainingState::Completed;

        for epoch in 0..self.config.epochs {
            if self.stop.is_stop_requested() {
                info!("Stop requested, ending run after epoch {}", epoch);
                final_state = TrainingState::Stopped;
                break;
            }

            let train_loss = self.run_epoch(&mut model, train_set, epoch);
            let (_, train_accuracy) = model.evaluate(train_set);
            let (val_loss, val_accuracy) = model.evaluate(val_set);

            if !train_loss.is_finite() || !val_loss.is_finite() {
                warn!(
                    "Non-finite loss at epoch {} (train {}, val {}), failing run",
                    epoch + 1,
                    train_loss,
                    val_loss
                );
                self.state = TrainingState::Failed;
                self.stop.reset();
                return Ok(TrainingOutcome {
                    state: TrainingState::Failed,
                    model: None,
                    history,
                    final_metrics: None,
                    training_time_secs: started.elapsed().as_secs_f64(),
                });
            }

            let elapsed = started.elapsed().as_secs_f64();
            let done = (epoch + 1) as f64;
            let progress = TrainingProgress {
                epoch: epoch + 1,
                total_epochs: self.config.epochs,
                train_loss,
                train_accuracy,
                val_loss,
                val_accuracy,
                elapsed_secs: elapsed,
                estimated_remaining_secs: elapsed / done
                    * (self.config.epochs - epoch - 1) as f64,
            };
            self.emit(&progress);
            history.push(progress);

            info!(
                "Epoch {}/{}: train loss {:.4} acc {:.3}, val loss {:.4} acc {:.3}",
                epoch + 1,
                self.config.epochs,
                train_loss,
                train_accuracy,
                val_loss,
                val_accuracy
            );

            if val_loss < best_val_loss - IMPROVEMENT_EPSILON {
                best_val_loss = val_loss;
                epochs_without_improvement = 0;
            } else {
                epochs_without_improvement += 1;
                if self.config.early_stopping && epochs_without_improvement >= self.config.patience
                {
                    info!(
                        "Early stopping after epoch {}: no improvement for {} epochs",
                        epoch + 1,
                        epochs_without_improvement
                    );
                    break;
                }
            }
        }

        // A stop request is consumed by the run that observed it; the
        // orchestrator is reusable afterwards.
        self.stop.reset();

        let (val_loss, _) = model.evaluate(val_set);
        let predictions = model.predict_indices(val_set);
        let targets: Vec<usize> = (0..val_set.len()).map(|i| val_set.label_index(i)).collect();
        let mut metrics =
            EvaluationMetrics::from_predictions(&predictions, &targets, model.num_classes());
        metrics.loss = Some(val_loss);

        let training_time_secs = started.elapsed().as_secs_f64();
        info!(
            "Run finished as {:?} in {:.1}s: val accuracy {:.3}",
            final_state, training_time_secs, metrics.accuracy
        );

        self.state = final_state;
        Ok(TrainingOutcome {
            state: final_state,
            model: Some(model),
            history,
            final_metrics: Some(metrics),
            training_time_secs,
        })
    }

    /// Validates datasets and derives the model metadata from the training
    /// set. All checks happen before any gradient work.
    fn prepare(&self, train_set: &TensorSet, val_set: &TensorSet) -> Result<ModelMetadata> {
        if train_set.len() < self.config.min_samples {
            return Err(RetinaError::InsufficientData {
                found: train_set.len(),
                required: self.config.min_samples,
            });
        }
        if val_set.is_empty() {
            return Err(RetinaError::TrainingFailed {
                stage: "preparing".to_string(),
                reason: "validation set is empty".to_string(),
            });
        }
        if train_set.class_names.is_empty() {
            return Err(RetinaError::TrainingFailed {
                stage: "preparing".to_string(),
                reason: "no class names configured".to_string(),
            });
        }

        let [_, height, width, channels] = train_set.images[0].shape();
        let expected = [1, height, width, channels];
        let num_classes = train_set.class_names.len();
        for (name, set) in [("train", train_set), ("val", val_set)] {
            if let Some(bad) = set.images.iter().find(|t| t.shape() != expected) {
                return Err(RetinaError::TrainingFailed {
                    stage: "preparing".to_string(),
                    reason: format!(
                        "{} set contains shape {:?}, expected {:?}",
                        name,
                        bad.shape(),
                        expected
                    ),
                });
            }
            if set.labels.len() != set.images.len() {
                return Err(RetinaError::TrainingFailed {
                    stage: "preparing".to_string(),
                    reason: format!(
                        "{} set has {} label vectors for {} images",
                        name,
                        set.labels.len(),
                        set.images.len()
                    ),
                });
            }
            if let Some(bad) = set.labels.iter().find(|l| l.len() != num_classes) {
                return Err(RetinaError::TrainingFailed {
                    stage: "preparing".to_string(),
                    reason: format!(
                        "{} set contains a label vector of length {}, expected {}",
                        name,
                        bad.len(),
                        num_classes
                    ),
                });
            }
        }

        Ok(ModelMetadata {
            input_width: width as u32,
            input_height: height as u32,
            channels: channels as u32,
            class_names: train_set.class_names.clone(),
            normalization: train_set.normalization.clone(),
        })
    }

    /// One pass over the training set in shuffled mini-batches; returns the
    /// mean batch loss. The shuffle seed mixes the epoch in so each epoch
    /// sees a different but reproducible order.
    fn run_epoch(&self, model: &mut SoftmaxClassifier, train_set: &TensorSet, epoch: usize) -> f64 {
        let mut indices: Vec<usize> = (0..train_set.len()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(epoch as u64));
        indices.shuffle(&mut rng);

        let mut total_loss = 0.0f64;
        let mut batches = 0usize;
        for chunk in indices.chunks(self.config.batch_size) {
            let batch: Vec<(&Tensor, &[f32])> = chunk
                .iter()
                .map(|&i| (&train_set.images[i], train_set.labels[i].as_slice()))
                .collect();
            total_loss += model.train_batch(&batch, self.config.learning_rate) as f64;
            batches += 1;
        }

        if batches > 0 {
            total_loss / batches as f64
        } else {
            0.0
        }
    }

    fn emit(&mut self, progress: &TrainingProgress) {
        self.subscribers
            .retain(|tx| tx.send(progress.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::NormalizationRecord;

    fn labeled_set(n: usize, classes: &[&str]) -> TensorSet {
        let class_names: Vec<String> = classes.iter().map(|s| s.to_string()).collect();
        let mut images = Vec::new();
        let mut labels = Vec::new();
        for i in 0..n {
            let class = i % classes.len();
            // Class-dependent intensity so the data is separable.
            let value = 0.2 + 0.6 * class as f32 / classes.len() as f32;
            images.push(Tensor::from_fn([1, 4, 4, 3], |_, _, _, _| value));
            let mut one_hot = vec![0.0; classes.len()];
            one_hot[class] = 1.0;
            labels.push(one_hot);
        }
        TensorSet {
            images,
            labels,
            class_names,
            normalization: NormalizationRecord::min_max(),
        }
    }

    fn fast_config() -> TrainingConfig {
        TrainingConfig {
            epochs: 5,
            batch_size: 4,
            learning_rate: 0.5,
            early_stopping: false,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_completed_run_returns_model_and_history() {
        let mut orchestrator = TrainingOrchestrator::new(fast_config()).unwrap();
        let train = labeled_set(12, &["glaucoma", "normal"]);
        let val = labeled_set(4, &["glaucoma", "normal"]);

        let outcome = orchestrator.train(&train, &val).unwrap();

        assert_eq!(outcome.state, TrainingState::Completed);
        assert!(outcome.model.is_some());
        assert_eq!(outcome.history.len(), 5);
        assert!(outcome.final_metrics.is_some());
        assert_eq!(orchestrator.state(), TrainingState::Completed);
    }

    #[test]
    fn test_progress_epochs_strictly_increasing() {
        let mut orchestrator = TrainingOrchestrator::new(fast_config()).unwrap();
        let rx = orchestrator.subscribe();
        let train = labeled_set(12, &["glaucoma", "normal"]);
        let val = labeled_set(4, &["glaucoma", "normal"]);

        orchestrator.train(&train, &val).unwrap();

        let received: Vec<TrainingProgress> = rx.try_iter().collect();
        assert_eq!(received.len(), 5);
        for (i, p) in received.iter().enumerate() {
            assert_eq!(p.epoch, i + 1);
            assert_eq!(p.total_epochs, 5);
        }
    }

    #[test]
    fn test_insufficient_data_rejected() {
        let mut orchestrator = TrainingOrchestrator::new(fast_config()).unwrap();
        let train = labeled_set(4, &["glaucoma", "normal"]);
        let val = labeled_set(2, &["glaucoma", "normal"]);

        let err = orchestrator.train(&train, &val).unwrap_err();
        assert!(matches!(
            err,
            RetinaError::InsufficientData {
                found: 4,
                required: 10
            }
        ));
    }

    #[test]
    fn test_empty_validation_rejected() {
        let mut orchestrator = TrainingOrchestrator::new(fast_config()).unwrap();
        let train = labeled_set(12, &["glaucoma", "normal"]);
        let val = labeled_set(0, &["glaucoma", "normal"]);

        let err = orchestrator.train(&train, &val).unwrap_err();
        assert!(matches!(err, RetinaError::TrainingFailed { .. }));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut orchestrator = TrainingOrchestrator::new(fast_config()).unwrap();
        let mut train = labeled_set(12, &["glaucoma", "normal"]);
        train.images[3] = Tensor::zeros([1, 8, 8, 3]);
        let val = labeled_set(4, &["glaucoma", "normal"]);

        let err = orchestrator.train(&train, &val).unwrap_err();
        assert!(matches!(err, RetinaError::TrainingFailed { .. }));
    }

    #[test]
    fn test_nan_loss_fails_with_history() {
        // A huge learning rate on separable data overflows the logits into
        // NaN within a few epochs.
        let config = TrainingConfig {
            epochs: 50,
            batch_size: 4,
            learning_rate: 1e30,
            early_stopping: false,
            ..TrainingConfig::default()
        };
        let mut orchestrator = TrainingOrchestrator::new(config).unwrap();
        let train = labeled_set(12, &["glaucoma", "normal"]);
        let val = labeled_set(4, &["glaucoma", "normal"]);

        let outcome = orchestrator.train(&train, &val).unwrap();
        assert_eq!(outcome.state, TrainingState::Failed);
        assert!(outcome.model.is_none());
        assert!(outcome.history.len() < 50);
    }

    #[test]
    fn test_stop_before_start_yields_stopped() {
        let mut orchestrator = TrainingOrchestrator::new(fast_config()).unwrap();
        orchestrator.stop_handle().request_stop();

        let train = labeled_set(12, &["glaucoma", "normal"]);
        let val = labeled_set(4, &["glaucoma", "normal"]);

        let outcome = orchestrator.train(&train, &val).unwrap();
        assert_eq!(outcome.state, TrainingState::Stopped);
        assert!(outcome.history.is_empty());
        assert!(outcome.model.is_some());
    }

    #[test]
    fn test_short_label_vectors_rejected() {
        // Label vectors shorter than the class list must fail in
        // preparation rather than mid-epoch.
        let mut orchestrator = TrainingOrchestrator::new(fast_config()).unwrap();
        let mut train = labeled_set(12, &["glaucoma", "normal"]);
        for label in train.labels.iter_mut() {
            label.truncate(1);
        }
        let val = labeled_set(4, &["glaucoma", "normal"]);

        let err = orchestrator.train(&train, &val).unwrap_err();
        assert!(matches!(
            err,
            RetinaError::TrainingFailed { ref stage, .. } if stage == "preparing"
        ));
    }

    #[test]
    fn test_label_count_mismatch_rejected() {
        let mut orchestrator = TrainingOrchestrator::new(fast_config()).unwrap();
        let train = labeled_set(12, &["glaucoma", "normal"]);
        let mut val = labeled_set(4, &["glaucoma", "normal"]);
        val.labels.pop();

        let err = orchestrator.train(&train, &val).unwrap_err();
        assert!(matches!(err, RetinaError::TrainingFailed { .. }));
    }

    #[test]
    fn test_orchestrator_reusable_after_stop() {
        let mut orchestrator = TrainingOrchestrator::new(fast_config()).unwrap();
        let train = labeled_set(12, &["glaucoma", "normal"]);
        let val = labeled_set(4, &["glaucoma", "normal"]);

        orchestrator.stop_handle().request_stop();
        let stopped = orchestrator.train(&train, &val).unwrap();
        assert_eq!(stopped.state, TrainingState::Stopped);

        // The stop request was consumed; the next run trains normally.
        let outcome = orchestrator.train(&train, &val).unwrap();
        assert_eq!(outcome.state, TrainingState::Completed);
        assert_eq!(outcome.history.len(), 5);
    }

    #[test]
    fn test_early_stopping_limits_epochs() {
        let config = TrainingConfig {
            epochs: 100,
            batch_size: 4,
            learning_rate: 0.5,
            early_stopping: true,
            patience: 2,
            ..TrainingConfig::default()
        };
        let mut orchestrator = TrainingOrchestrator::new(config).unwrap();
        let train = labeled_set(12, &["glaucoma", "normal"]);
        let val = labeled_set(4, &["glaucoma", "normal"]);

        let outcome = orchestrator.train(&train, &val).unwrap();
        assert_eq!(outcome.state, TrainingState::Completed);
        assert!(outcome.history.len() < 100);
    }
}
