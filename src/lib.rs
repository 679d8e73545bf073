//! retina-ml: offline lifecycle manager for retinal-disease image
//! classifiers.
//!
//! The crate covers the whole loop an offline deployment needs: decoding and
//! normalizing uploaded fundus images, expanding small labeled sets with
//! seeded augmentation, training softmax classifiers with live progress
//! reporting, versioning the results per disease type, caching serialized
//! artifacts under a byte budget, and serving predictions with the exact
//! preprocessing each model was trained with.
//!
//! # Example
//!
//! ```no_run
//! use retina_ml::dataset::preprocess::{PreprocessConfig, Preprocessor};
//! use retina_ml::dataset::split::{partition, DEFAULT_SEED};
//! use retina_ml::training::{TrainingConfig, TrainingOrchestrator};
//!
//! # fn main() -> retina_ml::Result<()> {
//! let samples = Vec::new(); // labeled ImageSamples from the upload layer
//! let classes: Vec<String> = ["cataract", "diabetic-retinopathy", "glaucoma", "normal"]
//!     .iter()
//!     .map(|s| s.to_string())
//!     .collect();
//!
//! let preprocessor = Preprocessor::new(PreprocessConfig::default());
//! let parts = partition(&samples, &classes, 0.2, 0.1, DEFAULT_SEED, &preprocessor)?;
//!
//! let mut orchestrator = TrainingOrchestrator::new(TrainingConfig::default())?;
//! let outcome = orchestrator.train(&parts.train, &parts.val)?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod registry;
pub mod training;
pub mod utils;

pub use cache::{ArtifactMetadata, CacheConfig, CacheStats, ModelCache, PinnedArtifact};
pub use dataset::augmentation::{AugmentationConfig, AugmentationPipeline};
pub use dataset::split::{partition, PartitionedDataset, DEFAULT_SEED};
pub use dataset::{DatasetStatistics, ImageSample, NormalizationMethod, Tensor, TensorSet};
pub use inference::{InferenceConfig, InferenceEngine, InferenceResult};
pub use model::{ModelMetadata, SoftmaxClassifier};
pub use registry::{ModelRegistry, ModelVersion, VersionComparison, VersionSpec, Winner};
pub use training::{
    StopHandle, TrainingConfig, TrainingOrchestrator, TrainingOutcome, TrainingProgress,
    TrainingState,
};
pub use utils::{EvaluationMetrics, Result, RetinaError};
