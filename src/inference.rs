//! Inference engine serving cached model artifacts.
//!
//! Models are rebuilt from cached artifact bytes together with the exact
//! preprocessing they were trained with, so train and serve paths never
//! diverge. A loaded model keeps its cache entry pinned for as long as it is
//! resident, and predictions share the loaded model behind an `Arc` without
//! any per-call locking of the weights.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::cache::{ModelCache, PinnedArtifact};
use crate::dataset::preprocess::{PreprocessConfig, Preprocessor, ResizeFilter};
use crate::model::{argmax, SoftmaxClassifier};
use crate::utils::{Result, RetinaError};

/// Serving parameters for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub model_name: String,
    /// Minimum probability for a class to appear in the result map
    pub confidence_threshold: f32,
    /// Maximum number of classes reported
    pub top_k: usize,
}

impl InferenceConfig {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            confidence_threshold: 0.65,
            top_k: 3,
        }
    }
}

/// One classification outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Most probable class, regardless of threshold
    pub class_name: String,
    /// Top-K classes at or above the confidence threshold
    pub class_probabilities: BTreeMap<String, f32>,
    /// True maximum probability, even when below threshold
    pub confidence: f32,
    pub processing_time_ms: f64,
    pub model_used: String,
}

/// A model resident in memory, immutable once loaded.
struct LoadedModel {
    classifier: SoftmaxClassifier,
    preprocessor: Preprocessor,
    config: InferenceConfig,
    /// Pins the cache entry so the artifact cannot be evicted while loaded
    _artifact: PinnedArtifact,
}

/// Serves predictions from models held in the artifact cache.
pub struct InferenceEngine {
    cache: Arc<ModelCache>,
    models: RwLock<HashMap<String, Arc<LoadedModel>>>,
}

impl InferenceEngine {
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self {
            cache,
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Pre-warms one model per config from the cache. The engine never
    /// trains; a missing artifact fails with `ModelNotReady`.
    pub fn initialize(&self, configs: Vec<InferenceConfig>) -> Result<()> {
        for config in configs {
            let loaded = self.load_from_cache(config)?;
            info!(
                "Loaded model '{}' ({} classes, {} parameters)",
                loaded.config.model_name,
                loaded.classifier.num_classes(),
                loaded.classifier.parameter_count()
            );
            self.models
                .write()
                .insert(loaded.config.model_name.clone(), Arc::new(loaded));
        }
        Ok(())
    }

    pub fn is_ready(&self, model_name: &str) -> bool {
        self.models.read().contains_key(model_name)
    }

    /// Names of all resident models.
    pub fn loaded_models(&self) -> Vec<String> {
        self.models.read().keys().cloned().collect()
    }

    /// Drops a resident model, releasing its cache pin.
    pub fn unload(&self, model_name: &str) -> bool {
        self.models.write().remove(model_name).is_some()
    }

    /// Classifies encoded image bytes with the named model.
    ///
    /// The image goes through the preprocessing recorded in the model's
    /// artifact. Models not yet resident are loaded from the cache on
    /// demand with default serving parameters.
    pub fn predict(&self, image_bytes: &[u8], model_name: &str) -> Result<InferenceResult> {
        let started = Instant::now();
        let model = self.resident_or_load(model_name)?;

        let image = image::load_from_memory(image_bytes)
            .map_err(|e| RetinaError::Image(format!("failed to decode upload: {}", e)))?;
        let tensor = model.preprocessor.process(&image);

        let probs = model.classifier.predict(tensor.data());
        let class_names = &model.classifier.metadata().class_names;

        let best = argmax(&probs);
        let confidence = probs[best];

        let mut ranked: Vec<(usize, f32)> = probs.iter().cloned().enumerate().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let class_probabilities: BTreeMap<String, f32> = ranked
            .into_iter()
            .take(model.config.top_k)
            .filter(|&(_, p)| p >= model.config.confidence_threshold)
            .map(|(i, p)| (class_names[i].clone(), p))
            .collect();

        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "Predicted '{}' with confidence {:.3} in {:.2}ms",
            class_names[best], confidence, processing_time_ms
        );

        Ok(InferenceResult {
            class_name: class_names[best].clone(),
            class_probabilities,
            confidence,
            processing_time_ms,
            model_used: model_name.to_string(),
        })
    }

    fn resident_or_load(&self, model_name: &str) -> Result<Arc<LoadedModel>> {
        if let Some(model) = self.models.read().get(model_name) {
            return Ok(Arc::clone(model));
        }

        let loaded = Arc::new(self.load_from_cache(InferenceConfig::new(model_name))?);
        self.models
            .write()
            .insert(model_name.to_string(), Arc::clone(&loaded));
        Ok(loaded)
    }

    fn load_from_cache(&self, config: InferenceConfig) -> Result<LoadedModel> {
        let artifact =
            self.cache
                .get(&config.model_name)
                .ok_or_else(|| RetinaError::ModelNotReady {
                    model_name: config.model_name.clone(),
                })?;

        let classifier = SoftmaxClassifier::from_artifact_bytes(artifact.bytes())?;
        let metadata = classifier.metadata();
        let preprocessor = Preprocessor::new(PreprocessConfig {
            width: metadata.input_width,
            height: metadata.input_height,
            filter: ResizeFilter::Bilinear,
            normalization: metadata.normalization.clone(),
        });

        Ok(LoadedModel {
            classifier,
            preprocessor,
            config,
            _artifact: artifact,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ArtifactMetadata, CacheConfig};
    use crate::dataset::NormalizationRecord;
    use crate::model::ModelMetadata;
    use image::{DynamicImage, ImageBuffer, Rgb};

    fn retina_classes() -> Vec<String> {
        ["cataract", "diabetic-retinopathy", "glaucoma", "normal"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn cached_model(cache: &ModelCache, name: &str) -> SoftmaxClassifier {
        let metadata = ModelMetadata {
            input_width: 8,
            input_height: 8,
            channels: 3,
            class_names: retina_classes(),
            normalization: NormalizationRecord::min_max(),
        };
        let model = SoftmaxClassifier::new(metadata, 42).unwrap();
        cache.put(
            name,
            model.to_artifact_bytes().unwrap(),
            ArtifactMetadata {
                version: "1.0.0".to_string(),
                pretrained: false,
                accuracy: Some(0.9),
            },
        );
        model
    }

    fn encoded_image() -> Vec<u8> {
        let img = ImageBuffer::from_pixel(16, 16, Rgb([120u8, 60, 200]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageOutputFormat::Png,
            )
            .unwrap();
        bytes
    }

    fn engine_with_model(name: &str) -> InferenceEngine {
        let cache = Arc::new(ModelCache::new(CacheConfig::default()));
        cached_model(&cache, name);
        InferenceEngine::new(cache)
    }

    #[test]
    fn test_initialize_missing_artifact() {
        let cache = Arc::new(ModelCache::new(CacheConfig::default()));
        let engine = InferenceEngine::new(cache);

        let err = engine
            .initialize(vec![InferenceConfig::new("glaucoma")])
            .unwrap_err();
        assert!(matches!(
            err,
            RetinaError::ModelNotReady { model_name } if model_name == "glaucoma"
        ));
    }

    #[test]
    fn test_initialize_and_predict() {
        let engine = engine_with_model("retina");
        engine
            .initialize(vec![InferenceConfig::new("retina")])
            .unwrap();
        assert!(engine.is_ready("retina"));

        let result = engine.predict(&encoded_image(), "retina").unwrap();
        assert!(retina_classes().contains(&result.class_name));
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
        assert_eq!(result.model_used, "retina");
        assert!(result.processing_time_ms >= 0.0);
    }

    #[test]
    fn test_confidence_reported_even_below_threshold() {
        // A freshly initialized 4-class model is near uniform, so every
        // probability sits well under the 0.65 default threshold.
        let engine = engine_with_model("retina");
        let result = engine.predict(&encoded_image(), "retina").unwrap();

        assert!(result.class_probabilities.is_empty());
        assert!(result.confidence > 0.2 && result.confidence < 0.65);
        assert!(!result.class_name.is_empty());
    }

    #[test]
    fn test_top_k_with_zero_threshold() {
        let engine = engine_with_model("retina");
        let mut config = InferenceConfig::new("retina");
        config.confidence_threshold = 0.0;
        config.top_k = 3;
        engine.initialize(vec![config]).unwrap();

        let result = engine.predict(&encoded_image(), "retina").unwrap();
        assert_eq!(result.class_probabilities.len(), 3);
        // Reported probabilities include the winner.
        assert!(result.class_probabilities.contains_key(&result.class_name));
    }

    #[test]
    fn test_lazy_load_from_cache() {
        let engine = engine_with_model("retina");
        assert!(!engine.is_ready("retina"));

        engine.predict(&encoded_image(), "retina").unwrap();
        assert!(engine.is_ready("retina"));
    }

    #[test]
    fn test_predict_unknown_model() {
        let cache = Arc::new(ModelCache::new(CacheConfig::default()));
        let engine = InferenceEngine::new(cache);

        let err = engine.predict(&encoded_image(), "missing").unwrap_err();
        assert!(matches!(err, RetinaError::ModelNotReady { .. }));
    }

    #[test]
    fn test_invalid_image_bytes() {
        let engine = engine_with_model("retina");
        let err = engine.predict(&[0u8, 1, 2], "retina").unwrap_err();
        assert!(matches!(err, RetinaError::Image(_)));
    }

    #[test]
    fn test_loaded_model_pins_artifact() {
        // Budget fits the small artifact but not the artifact plus the
        // pressure entry below.
        let cache = Arc::new(ModelCache::new(CacheConfig {
            max_bytes: 8 * 1024,
            max_entries: 16,
            protect_pretrained: true,
        }));
        cached_model(&cache, "retina");
        let engine = InferenceEngine::new(Arc::clone(&cache));
        engine
            .initialize(vec![InferenceConfig::new("retina")])
            .unwrap();

        // Without the pin, LRU order would evict the older artifact first.
        cache.put(
            "other",
            vec![0u8; 16 * 1024],
            ArtifactMetadata {
                version: "1.0.0".to_string(),
                pretrained: false,
                accuracy: None,
            },
        );

        assert!(cache.contains("retina"), "loaded model lost its artifact");
        engine.predict(&encoded_image(), "retina").unwrap();

        // Unloading releases the pin.
        assert!(engine.unload("retina"));
    }
}
