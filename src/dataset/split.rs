//! Deterministic partitioning of labeled samples into train/val/test sets.
//!
//! The split is a single pass: shuffle with a caller-supplied seed, then
//! slice by cumulative ratios. Boundaries are floored, so any rounding
//! remainder lands in the training set.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::info;

use crate::dataset::preprocess::Preprocessor;
use crate::dataset::{DatasetStatistics, ImageSample, Tensor, TensorSet};
use crate::utils::{Result, RetinaError};

/// Fixed default seed so repeated runs produce identical partitions.
pub const DEFAULT_SEED: u64 = 42;

/// The three disjoint tensor sets plus read-only dataset statistics.
#[derive(Debug, Clone)]
pub struct PartitionedDataset {
    pub train: TensorSet,
    pub val: TensorSet,
    pub test: TensorSet,
    pub statistics: DatasetStatistics,
}

/// Partitions labeled samples into train/validation/test tensor sets.
///
/// Samples are decoded in parallel, shuffled deterministically with `seed`,
/// and sliced at `floor(n * (1 - val - test))` and `floor(n * (1 - test))`.
/// Fails with `InvalidSplit` on bad ratios and `UnknownLabel` when a sample
/// label is missing from `class_names`.
pub fn partition(
    samples: &[ImageSample],
    class_names: &[String],
    val_split: f32,
    test_split: f32,
    seed: u64,
    preprocessor: &Preprocessor,
) -> Result<PartitionedDataset> {
    if !val_split.is_finite()
        || !test_split.is_finite()
        || val_split < 0.0
        || test_split < 0.0
        || val_split + test_split >= 1.0
    {
        return Err(RetinaError::InvalidSplit {
            val_split,
            test_split,
        });
    }

    // Label validation happens before any decoding work.
    let labels: Vec<Vec<f32>> = samples
        .iter()
        .map(|s| preprocessor.one_hot(s, class_names))
        .collect::<Result<_>>()?;

    let statistics = DatasetStatistics::from_samples(samples);

    let tensors: Vec<Tensor> = samples
        .par_iter()
        .map(|s| preprocessor.decode_sample(s))
        .collect::<Result<_>>()?;

    let n = samples.len();
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let train_end = (n as f64 * (1.0 - val_split as f64 - test_split as f64)).floor() as usize;
    let val_end = (n as f64 * (1.0 - test_split as f64)).floor() as usize;

    let mut tensors: Vec<Option<Tensor>> = tensors.into_iter().map(Some).collect();
    let mut labels: Vec<Option<Vec<f32>>> = labels.into_iter().map(Some).collect();

    let mut take_set = |range: &[usize]| -> TensorSet {
        let mut images = Vec::with_capacity(range.len());
        let mut set_labels = Vec::with_capacity(range.len());
        for &i in range {
            images.push(tensors[i].take().expect("index taken once"));
            set_labels.push(labels[i].take().expect("index taken once"));
        }
        TensorSet {
            images,
            labels: set_labels,
            class_names: class_names.to_vec(),
            normalization: preprocessor.config().normalization.clone(),
        }
    };

    let train = take_set(&indices[..train_end]);
    let val = take_set(&indices[train_end..val_end]);
    let test = take_set(&indices[val_end..]);

    info!(
        "Partitioned {} samples: train={}, val={}, test={} (seed {})",
        n,
        train.len(),
        val.len(),
        test.len(),
        seed
    );

    Ok(PartitionedDataset {
        train,
        val,
        test,
        statistics,
    })
}
