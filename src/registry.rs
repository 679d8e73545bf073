//! In-memory model version registry.
//!
//! Tracks every trained version per disease type and which one is currently
//! serving. All mutation goes through one `parking_lot::Mutex`, so the
//! current-version flip is atomic: at most one version per disease type is
//! current at any observable point.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::utils::{Result, RetinaError};

/// One registered model version and its training record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: Uuid,
    pub disease_type: String,
    /// Semver-style version string, e.g. "1.2.0"
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub dataset_size: usize,
    pub epochs: usize,
    pub training_time_secs: f64,
    pub accuracy: f64,
    pub loss: f64,
    pub parameter_count: usize,
    pub is_current: bool,
    pub tags: Vec<String>,
    pub description: String,
    /// Mean serving latency, recorded after deployment
    pub inference_latency_ms: Option<f64>,
}

/// Input record for [`ModelRegistry::register`].
#[derive(Debug, Clone)]
pub struct VersionSpec {
    pub disease_type: String,
    pub version: String,
    pub dataset_size: usize,
    pub epochs: usize,
    pub training_time_secs: f64,
    pub accuracy: f64,
    pub loss: f64,
    pub parameter_count: usize,
    pub tags: Vec<String>,
    pub description: String,
    /// Promote to current on registration (the default workflow)
    pub make_current: bool,
}

/// Outcome of comparing two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    First,
    Second,
    Tie,
}

/// Signed metric differences between two versions (first minus second).
#[derive(Debug, Clone)]
pub struct VersionComparison {
    pub first: Uuid,
    pub second: Uuid,
    pub accuracy_diff: f64,
    pub loss_diff: f64,
    pub parameter_diff: i64,
    pub training_time_diff_secs: f64,
    pub winner: Winner,
}

/// Thread-safe registry of model versions.
///
/// Insertion order doubles as the recency order for pruning; `created_at`
/// timestamps are informational.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    versions: Mutex<Vec<ModelVersion>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new version and returns its id. When `make_current` is
    /// set the new version displaces the previous current for its disease
    /// type in the same critical section.
    pub fn register(&self, spec: VersionSpec) -> Uuid {
        let id = Uuid::new_v4();
        let mut versions = self.versions.lock();

        if spec.make_current {
            for v in versions.iter_mut() {
                if v.disease_type == spec.disease_type {
                    v.is_current = false;
                }
            }
        }

        info!(
            "Registered version {} for '{}' (accuracy {:.3}, current: {})",
            spec.version, spec.disease_type, spec.accuracy, spec.make_current
        );

        versions.push(ModelVersion {
            id,
            disease_type: spec.disease_type,
            version: spec.version,
            created_at: Utc::now(),
            dataset_size: spec.dataset_size,
            epochs: spec.epochs,
            training_time_secs: spec.training_time_secs,
            accuracy: spec.accuracy,
            loss: spec.loss,
            parameter_count: spec.parameter_count,
            is_current: spec.make_current,
            tags: spec.tags,
            description: spec.description,
            inference_latency_ms: None,
        });
        id
    }

    /// Makes `id` the current version for its disease type, demoting the
    /// previous current atomically.
    pub fn set_current(&self, id: Uuid) -> Result<()> {
        let mut versions = self.versions.lock();

        let disease_type = versions
            .iter()
            .find(|v| v.id == id)
            .map(|v| v.disease_type.clone())
            .ok_or_else(|| RetinaError::NotFound(format!("version {}", id)))?;

        for v in versions.iter_mut() {
            if v.disease_type == disease_type {
                v.is_current = v.id == id;
            }
        }
        debug!("Current version for '{}' is now {}", disease_type, id);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<ModelVersion> {
        self.versions.lock().iter().find(|v| v.id == id).cloned()
    }

    /// All versions for a disease type, newest first.
    pub fn list(&self, disease_type: &str) -> Vec<ModelVersion> {
        self.versions
            .lock()
            .iter()
            .filter(|v| v.disease_type == disease_type)
            .rev()
            .cloned()
            .collect()
    }

    /// The currently serving version for a disease type, if any.
    pub fn current_version(&self, disease_type: &str) -> Option<ModelVersion> {
        self.versions
            .lock()
            .iter()
            .find(|v| v.disease_type == disease_type && v.is_current)
            .cloned()
    }

    /// Records observed serving latency on a version, for comparison
    /// tie-breaks.
    pub fn record_inference_latency(&self, id: Uuid, latency_ms: f64) -> Result<()> {
        let mut versions = self.versions.lock();
        let version = versions
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| RetinaError::NotFound(format!("version {}", id)))?;
        version.inference_latency_ms = Some(latency_ms);
        Ok(())
    }

    /// Compares two versions without mutating either. The winner is the one
    /// with higher accuracy; exact accuracy ties fall back to lower recorded
    /// inference latency, and remain `Tie` when neither has a latency.
    pub fn compare(&self, first: Uuid, second: Uuid) -> Result<VersionComparison> {
        let versions = self.versions.lock();
        let lookup = |id: Uuid| {
            versions
                .iter()
                .find(|v| v.id == id)
                .ok_or_else(|| RetinaError::NotFound(format!("version {}", id)))
        };
        let a = lookup(first)?;
        let b = lookup(second)?;

        let winner = if a.accuracy > b.accuracy {
            Winner::First
        } else if b.accuracy > a.accuracy {
            Winner::Second
        } else {
            match (a.inference_latency_ms, b.inference_latency_ms) {
                (Some(la), Some(lb)) if la < lb => Winner::First,
                (Some(la), Some(lb)) if lb < la => Winner::Second,
                _ => Winner::Tie,
            }
        };

        Ok(VersionComparison {
            first,
            second,
            accuracy_diff: a.accuracy - b.accuracy,
            loss_diff: a.loss - b.loss,
            parameter_diff: a.parameter_count as i64 - b.parameter_count as i64,
            training_time_diff_secs: a.training_time_secs - b.training_time_secs,
            winner,
        })
    }

    /// Removes all but the `keep` most recent versions of a disease type.
    /// The current version is never removed, even when it falls outside the
    /// keep window. Returns the number of versions removed.
    pub fn prune(&self, disease_type: &str, keep: usize) -> usize {
        let mut versions = self.versions.lock();

        let matching: Vec<Uuid> = versions
            .iter()
            .filter(|v| v.disease_type == disease_type)
            .map(|v| v.id)
            .collect();
        if matching.len() <= keep {
            return 0;
        }

        // Newest are at the end of the insertion order.
        let cutoff = matching.len() - keep;
        let stale: Vec<Uuid> = matching[..cutoff].to_vec();

        let before = versions.len();
        versions.retain(|v| v.is_current || !stale.contains(&v.id));
        let removed = before - versions.len();

        if removed > 0 {
            info!(
                "Pruned {} stale versions of '{}' (keep {})",
                removed, disease_type, keep
            );
        }
        removed
    }

    /// Deletes a version. The current version cannot be deleted; the caller
    /// must reassign current first.
    pub fn delete(&self, id: Uuid) -> Result<()> {
        let mut versions = self.versions.lock();
        let version = versions
            .iter()
            .find(|v| v.id == id)
            .ok_or_else(|| RetinaError::NotFound(format!("version {}", id)))?;

        if version.is_current {
            return Err(RetinaError::CannotDeleteCurrent {
                disease_type: version.disease_type.clone(),
                version_id: id.to_string(),
            });
        }

        versions.retain(|v| v.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(disease: &str, version: &str, accuracy: f64, make_current: bool) -> VersionSpec {
        VersionSpec {
            disease_type: disease.to_string(),
            version: version.to_string(),
            dataset_size: 100,
            epochs: 10,
            training_time_secs: 12.5,
            accuracy,
            loss: 1.0 - accuracy,
            parameter_count: 1000,
            tags: vec![],
            description: String::new(),
            make_current,
        }
    }

    #[test]
    fn test_register_makes_current() {
        let registry = ModelRegistry::new();
        let id = registry.register(spec("glaucoma", "1.0.0", 0.9, true));

        let current = registry.current_version("glaucoma").unwrap();
        assert_eq!(current.id, id);
        assert!(current.is_current);
    }

    #[test]
    fn test_exactly_one_current_after_flips() {
        let registry = ModelRegistry::new();
        let x = registry.register(spec("glaucoma", "1.0.0", 0.8, true));
        let y = registry.register(spec("glaucoma", "1.1.0", 0.85, false));

        registry.set_current(x).unwrap();
        registry.set_current(y).unwrap();

        let versions = registry.list("glaucoma");
        let current: Vec<_> = versions.iter().filter(|v| v.is_current).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, y);
    }

    #[test]
    fn test_current_is_per_disease_type() {
        let registry = ModelRegistry::new();
        let g = registry.register(spec("glaucoma", "1.0.0", 0.8, true));
        let c = registry.register(spec("cataract", "1.0.0", 0.9, true));

        assert_eq!(registry.current_version("glaucoma").unwrap().id, g);
        assert_eq!(registry.current_version("cataract").unwrap().id, c);
    }

    #[test]
    fn test_delete_current_rejected_and_unchanged() {
        let registry = ModelRegistry::new();
        let id = registry.register(spec("glaucoma", "1.0.0", 0.9, true));

        let err = registry.delete(id).unwrap_err();
        assert!(matches!(err, RetinaError::CannotDeleteCurrent { .. }));
        assert!(registry.get(id).is_some());
        assert_eq!(registry.current_version("glaucoma").unwrap().id, id);
    }

    #[test]
    fn test_delete_non_current() {
        let registry = ModelRegistry::new();
        let old = registry.register(spec("glaucoma", "1.0.0", 0.8, true));
        let _new = registry.register(spec("glaucoma", "1.1.0", 0.9, true));

        registry.delete(old).unwrap();
        assert!(registry.get(old).is_none());
        assert_eq!(registry.list("glaucoma").len(), 1);
    }

    #[test]
    fn test_compare_accuracy_winner_and_diff() {
        let registry = ModelRegistry::new();
        let a = registry.register(spec("glaucoma", "1.0.0", 0.94, true));
        let b = registry.register(spec("glaucoma", "1.1.0", 0.89, false));

        let cmp = registry.compare(a, b).unwrap();
        assert_eq!(cmp.winner, Winner::First);
        assert!((cmp.accuracy_diff - 0.05).abs() < 1e-10);
    }

    #[test]
    fn test_compare_tie_broken_by_latency() {
        let registry = ModelRegistry::new();
        let a = registry.register(spec("glaucoma", "1.0.0", 0.9, true));
        let b = registry.register(spec("glaucoma", "1.1.0", 0.9, false));

        assert_eq!(registry.compare(a, b).unwrap().winner, Winner::Tie);

        registry.record_inference_latency(a, 20.0).unwrap();
        registry.record_inference_latency(b, 12.0).unwrap();
        assert_eq!(registry.compare(a, b).unwrap().winner, Winner::Second);
    }

    #[test]
    fn test_compare_does_not_mutate() {
        let registry = ModelRegistry::new();
        let a = registry.register(spec("glaucoma", "1.0.0", 0.94, true));
        let b = registry.register(spec("glaucoma", "1.1.0", 0.89, false));

        registry.compare(a, b).unwrap();
        assert!(registry.get(a).unwrap().is_current);
        assert!(!registry.get(b).unwrap().is_current);
    }

    #[test]
    fn test_prune_keeps_recent_and_current() {
        let registry = ModelRegistry::new();
        // v1 is current; v2..v5 follow without promotion.
        let v1 = registry.register(spec("glaucoma", "1.0.0", 0.8, true));
        for (i, version) in ["1.1.0", "1.2.0", "1.3.0", "1.4.0"].iter().enumerate() {
            registry.register(spec("glaucoma", version, 0.8 + i as f64 * 0.01, false));
        }

        let removed = registry.prune("glaucoma", 3);
        assert_eq!(removed, 1);

        let remaining = registry.list("glaucoma");
        assert_eq!(remaining.len(), 4);
        assert!(remaining.iter().any(|v| v.id == v1), "current was pruned");
    }

    #[test]
    fn test_prune_under_limit_noop() {
        let registry = ModelRegistry::new();
        registry.register(spec("glaucoma", "1.0.0", 0.8, true));
        registry.register(spec("glaucoma", "1.1.0", 0.9, true));

        assert_eq!(registry.prune("glaucoma", 3), 0);
        assert_eq!(registry.list("glaucoma").len(), 2);
    }

    #[test]
    fn test_set_current_unknown_id() {
        let registry = ModelRegistry::new();
        assert!(matches!(
            registry.set_current(Uuid::new_v4()).unwrap_err(),
            RetinaError::NotFound(_)
        ));
    }
}
