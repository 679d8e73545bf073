//! Softmax classifier over flattened pixel tensors.
//!
//! The classifier is a single-layer multinomial logistic model trained with
//! mini-batch gradient descent. Weights are stored row-major, one row per
//! class. Artifacts serialize as a JSON metadata header followed by
//! little-endian `f32` weight blocks so a model can be rebuilt with the exact
//! preprocessing it was trained with.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::{NormalizationRecord, Tensor, TensorSet};
use crate::utils::{Result, RetinaError};

/// Artifact magic, "RML1" little-endian
const ARTIFACT_MAGIC: u32 = 0x314c_4d52;

/// Epsilon inside the cross-entropy log to avoid ln(0)
const LOSS_EPSILON: f32 = 1e-7;

/// Everything needed to rebuild the training-time preprocessing at serve
/// time: input geometry, class ordering, and the normalization record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub input_width: u32,
    pub input_height: u32,
    pub channels: u32,
    pub class_names: Vec<String>,
    pub normalization: NormalizationRecord,
}

impl ModelMetadata {
    /// Flattened input dimension
    pub fn input_dim(&self) -> usize {
        self.input_width as usize * self.input_height as usize * self.channels as usize
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }
}

/// Multinomial logistic classifier with seeded initialization.
#[derive(Debug, Clone)]
pub struct SoftmaxClassifier {
    metadata: ModelMetadata,
    /// `num_classes * input_dim`, row-major by class
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl SoftmaxClassifier {
    /// Creates a classifier with small random weights drawn from `seed`.
    pub fn new(metadata: ModelMetadata, seed: u64) -> Result<Self> {
        if metadata.class_names.is_empty() {
            return Err(RetinaError::Model(
                "classifier needs at least one class".to_string(),
            ));
        }
        if metadata.input_dim() == 0 {
            return Err(RetinaError::Model(
                "classifier input dimension is zero".to_string(),
            ));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let input_dim = metadata.input_dim();
        let num_classes = metadata.num_classes();
        let weights = (0..num_classes * input_dim)
            .map(|_| rng.gen_range(-0.01..0.01))
            .collect();

        Ok(Self {
            metadata,
            weights,
            bias: vec![0.0; num_classes],
        })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn input_dim(&self) -> usize {
        self.metadata.input_dim()
    }

    pub fn num_classes(&self) -> usize {
        self.metadata.num_classes()
    }

    /// Total learnable parameter count (weights + biases)
    pub fn parameter_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    /// Raw logits for one flattened input.
    ///
    /// Panics in debug builds when the input length does not match; callers
    /// validate shapes before training or inference.
    pub fn forward(&self, input: &[f32]) -> Vec<f32> {
        debug_assert_eq!(input.len(), self.input_dim());
        let input_dim = self.input_dim();
        self.bias
            .iter()
            .enumerate()
            .map(|(class, &b)| {
                let row = &self.weights[class * input_dim..(class + 1) * input_dim];
                b + row.iter().zip(input.iter()).map(|(&w, &x)| w * x).sum::<f32>()
            })
            .collect()
    }

    /// Class probabilities for one flattened input.
    pub fn predict(&self, input: &[f32]) -> Vec<f32> {
        softmax(&self.forward(input))
    }

    /// Runs one mini-batch gradient step and returns the mean batch loss.
    ///
    /// Gradient of softmax + cross-entropy is `(p - y) xᵀ` per sample;
    /// gradients are averaged over the batch before the SGD update.
    pub fn train_batch(&mut self, batch: &[(&Tensor, &[f32])], learning_rate: f32) -> f32 {
        if batch.is_empty() {
            return 0.0;
        }

        let input_dim = self.input_dim();
        let num_classes = self.num_classes();
        let mut grad_w = vec![0.0f32; num_classes * input_dim];
        let mut grad_b = vec![0.0f32; num_classes];
        let mut total_loss = 0.0f32;

        for (image, target) in batch {
            let input = image.data();
            let probs = self.predict(input);
            total_loss += cross_entropy(&probs, target);

            for class in 0..num_classes {
                let delta = probs[class] - target[class];
                grad_b[class] += delta;
                let row = &mut grad_w[class * input_dim..(class + 1) * input_dim];
                for (g, &x) in row.iter_mut().zip(input.iter()) {
                    *g += delta * x;
                }
            }
        }

        let scale = learning_rate / batch.len() as f32;
        for (w, g) in self.weights.iter_mut().zip(grad_w.iter()) {
            *w -= scale * g;
        }
        for (b, g) in self.bias.iter_mut().zip(grad_b.iter()) {
            *b -= scale * g;
        }

        total_loss / batch.len() as f32
    }

    /// Mean loss and accuracy over a tensor set.
    pub fn evaluate(&self, set: &TensorSet) -> (f64, f64) {
        if set.is_empty() {
            return (0.0, 0.0);
        }

        let mut total_loss = 0.0f64;
        let mut correct = 0usize;
        for (i, image) in set.images.iter().enumerate() {
            let probs = self.predict(image.data());
            total_loss += cross_entropy(&probs, &set.labels[i]) as f64;
            if argmax(&probs) == set.label_index(i) {
                correct += 1;
            }
        }

        (
            total_loss / set.len() as f64,
            correct as f64 / set.len() as f64,
        )
    }

    /// Predicted class indices over a tensor set, for confusion metrics.
    pub fn predict_indices(&self, set: &TensorSet) -> Vec<usize> {
        set.images
            .iter()
            .map(|image| argmax(&self.predict(image.data())))
            .collect()
    }

    /// Serializes the model: magic, JSON metadata header, then
    /// length-prefixed little-endian weight and bias blocks.
    pub fn to_artifact_bytes(&self) -> Result<Vec<u8>> {
        let header = serde_json::to_vec(&self.metadata)?;

        let mut bytes = Vec::with_capacity(16 + header.len() + 4 * self.parameter_count());
        bytes.extend_from_slice(&ARTIFACT_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&(header.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&header);

        for block in [&self.weights, &self.bias] {
            bytes.extend_from_slice(&(block.len() as u64).to_le_bytes());
            for &v in block.iter() {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
        }
        Ok(bytes)
    }

    /// Deserializes an artifact produced by [`to_artifact_bytes`].
    ///
    /// [`to_artifact_bytes`]: SoftmaxClassifier::to_artifact_bytes
    pub fn from_artifact_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ArtifactReader::new(bytes);

        let magic = reader.read_u32()?;
        if magic != ARTIFACT_MAGIC {
            return Err(RetinaError::Serialization(format!(
                "bad artifact magic {:#010x}",
                magic
            )));
        }

        let header_len = reader.read_u64()? as usize;
        let header = reader.read_slice(header_len)?;
        let metadata: ModelMetadata = serde_json::from_slice(header)?;

        let weights = reader.read_f32_block()?;
        let bias = reader.read_f32_block()?;

        if weights.len() != metadata.num_classes() * metadata.input_dim()
            || bias.len() != metadata.num_classes()
        {
            return Err(RetinaError::Serialization(format!(
                "artifact weight blocks ({}, {}) do not match metadata ({} classes x {} inputs)",
                weights.len(),
                bias.len(),
                metadata.num_classes(),
                metadata.input_dim()
            )));
        }

        Ok(Self {
            metadata,
            weights,
            bias,
        })
    }
}

/// Numerically stable softmax (max subtracted before exponentiation).
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&z| (z - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Cross-entropy of a probability vector against a one-hot (or soft) target.
pub fn cross_entropy(probs: &[f32], target: &[f32]) -> f32 {
    -probs
        .iter()
        .zip(target.iter())
        .map(|(&p, &y)| y * (p + LOSS_EPSILON).ln())
        .sum::<f32>()
}

/// Index of the largest value; 0 for an empty slice.
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Bounds-checked cursor over artifact bytes.
struct ArtifactReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ArtifactReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&e| e <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(RetinaError::Serialization(format!(
                "artifact truncated at offset {}",
                self.pos
            ))),
        }
    }

    fn read_u32(&mut self) -> Result<u32> {
        let slice = self.read_slice(4)?;
        Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let slice = self.read_slice(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(slice);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_f32_block(&mut self) -> Result<Vec<f32>> {
        let count = self.read_u64()? as usize;
        let byte_len = count.checked_mul(4).ok_or_else(|| {
            RetinaError::Serialization(format!(
                "artifact block length {} overflows at offset {}",
                count, self.pos
            ))
        })?;
        let slice = self.read_slice(byte_len)?;
        Ok(slice
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}
