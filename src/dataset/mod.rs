//! Dataset types: raw samples, normalized tensors, and split statistics.
//!
//! A [`Tensor`] is immutable after construction and owned by whichever
//! pipeline stage produced it; stages hand tensors onward by move, so a
//! tensor's backing buffer is freed as soon as the last stage drops it.

pub mod augmentation;
pub mod preprocess;
pub mod split;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::utils::{Result, RetinaError};

/// A raw uploaded image with its disease-type label.
///
/// The bytes are still encoded (PNG/JPEG); the preprocessor decodes them
/// exactly once. MIME and size validation is the upload collaborator's job.
#[derive(Debug, Clone)]
pub struct ImageSample {
    /// Encoded image bytes
    pub bytes: Vec<u8>,
    /// Class name, e.g. "glaucoma"
    pub label: String,
    /// Source filename, kept for error reporting
    pub filename: String,
}

impl ImageSample {
    pub fn new(bytes: Vec<u8>, label: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            bytes,
            label: label.into(),
            filename: filename.into(),
        }
    }
}

/// Pixel normalization method applied by the preprocessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizationMethod {
    /// Scale channel values into [0, 1]
    MinMax,
    /// Zero-mean/unit-variance using per-channel mean and std
    ZScore,
}

/// Records how a tensor set was normalized so downstream consumers
/// (augmentation clamping, inference preprocessing) interpret values
/// consistently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationRecord {
    pub method: NormalizationMethod,
    /// Per-channel mean, used by z-score
    pub mean: [f32; 3],
    /// Per-channel std, used by z-score
    pub std: [f32; 3],
    /// Smallest value a normalized pixel can take
    pub value_min: f32,
    /// Largest value a normalized pixel can take
    pub value_max: f32,
}

impl NormalizationRecord {
    /// Record for min-max normalization into [0, 1]
    pub fn min_max() -> Self {
        Self {
            method: NormalizationMethod::MinMax,
            mean: [0.0; 3],
            std: [1.0; 3],
            value_min: 0.0,
            value_max: 1.0,
        }
    }

    /// Record for z-score normalization with the given channel statistics.
    ///
    /// The value range is derived from the extreme pixel values 0 and 1
    /// after scaling, across all channels.
    pub fn z_score(mean: [f32; 3], std: [f32; 3]) -> Self {
        let mut value_min = f32::INFINITY;
        let mut value_max = f32::NEG_INFINITY;
        for c in 0..3 {
            value_min = value_min.min((0.0 - mean[c]) / std[c]);
            value_max = value_max.max((1.0 - mean[c]) / std[c]);
        }
        Self {
            method: NormalizationMethod::ZScore,
            mean,
            std,
            value_min,
            value_max,
        }
    }
}

/// An immutable multi-dimensional array of normalized pixel values.
///
/// Shape is `[batch, height, width, channels]`. Single images produced by
/// the preprocessor use batch size 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a tensor, checking that the buffer matches the shape.
    pub fn new(shape: [usize; 4], data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(RetinaError::Model(format!(
                "tensor shape {:?} expects {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Creates a zero-filled tensor.
    pub fn zeros(shape: [usize; 4]) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    /// Builds a tensor by evaluating `f(n, y, x, c)` for every element.
    pub fn from_fn(shape: [usize; 4], mut f: impl FnMut(usize, usize, usize, usize) -> f32) -> Self {
        let [n, h, w, c] = shape;
        let mut data = Vec::with_capacity(n * h * w * c);
        for ni in 0..n {
            for y in 0..h {
                for x in 0..w {
                    for ci in 0..c {
                        data.push(f(ni, y, x, ci));
                    }
                }
            }
        }
        Self { shape, data }
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn height(&self) -> usize {
        self.shape[1]
    }

    pub fn width(&self) -> usize {
        self.shape[2]
    }

    pub fn channels(&self) -> usize {
        self.shape[3]
    }

    /// Number of values in the tensor
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Consumes the tensor, returning its backing buffer.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Value at `[n, y, x, c]`. Out-of-range indices panic like slice access.
    pub fn get(&self, n: usize, y: usize, x: usize, c: usize) -> f32 {
        let [_, h, w, ch] = self.shape;
        self.data[((n * h + y) * w + x) * ch + c]
    }

    /// Mean value over the whole tensor
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }
}

/// A set of image tensors with their one-hot label vectors.
///
/// Labels are ordered according to `class_names`; `labels[i][j]` is 1.0 iff
/// sample `i` belongs to class `j`.
#[derive(Debug, Clone)]
pub struct TensorSet {
    pub images: Vec<Tensor>,
    pub labels: Vec<Vec<f32>>,
    pub class_names: Vec<String>,
    pub normalization: NormalizationRecord,
}

impl TensorSet {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Class index of sample `i` (argmax of the one-hot vector)
    pub fn label_index(&self, i: usize) -> usize {
        self.labels[i]
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }
}

/// Per-class sample counts and balance, computed as a read-only side
/// artifact of partitioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStatistics {
    /// Samples per class name
    pub per_class: BTreeMap<String, usize>,
    /// Total sample count
    pub total: usize,
    /// `1 - (max - min) / total`; 1.0 means perfectly balanced
    pub balance_ratio: f64,
}

impl DatasetStatistics {
    /// Computes statistics over a labeled sample list.
    pub fn from_samples(samples: &[ImageSample]) -> Self {
        let mut per_class: BTreeMap<String, usize> = BTreeMap::new();
        for sample in samples {
            *per_class.entry(sample.label.clone()).or_default() += 1;
        }

        let total = samples.len();
        let balance_ratio = if total == 0 || per_class.is_empty() {
            0.0
        } else {
            let max = *per_class.values().max().unwrap_or(&0);
            let min = *per_class.values().min().unwrap_or(&0);
            1.0 - (max - min) as f64 / total as f64
        };

        Self {
            per_class,
            total,
            balance_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_shape_mismatch() {
        let result = Tensor::new([1, 2, 2, 3], vec![0.0; 5]);
        assert!(result.is_err());
    }

    #[test]
    fn test_tensor_indexing() {
        let t = Tensor::from_fn([1, 2, 2, 3], |_, y, x, c| (y * 100 + x * 10 + c) as f32);
        assert_eq!(t.get(0, 0, 0, 0), 0.0);
        assert_eq!(t.get(0, 1, 0, 2), 102.0);
        assert_eq!(t.get(0, 1, 1, 1), 111.0);
    }

    #[test]
    fn test_z_score_record_range() {
        let record = NormalizationRecord::z_score([0.485, 0.456, 0.406], [0.229, 0.224, 0.225]);
        assert!(record.value_min < 0.0);
        assert!(record.value_max > 2.0);
    }

    #[test]
    fn test_statistics_balance() {
        let samples: Vec<ImageSample> = (0..6)
            .map(|i| {
                let label = if i < 3 { "glaucoma" } else { "normal" };
                ImageSample::new(vec![], label, format!("img_{}.png", i))
            })
            .collect();

        let stats = DatasetStatistics::from_samples(&samples);
        assert_eq!(stats.total, 6);
        assert_eq!(stats.per_class["glaucoma"], 3);
        assert!((stats.balance_ratio - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_statistics_imbalanced() {
        let mut samples = Vec::new();
        for i in 0..9 {
            samples.push(ImageSample::new(vec![], "cataract", format!("a{}.png", i)));
        }
        samples.push(ImageSample::new(vec![], "normal", "b.png"));

        let stats = DatasetStatistics::from_samples(&samples);
        assert!((stats.balance_ratio - 0.2).abs() < 1e-10);
    }
}
