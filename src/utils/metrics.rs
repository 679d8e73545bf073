//! Evaluation metrics for trained classifiers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Evaluation metrics computed from a set of predictions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Overall accuracy
    pub accuracy: f64,
    /// Average loss over the evaluated set, when available
    pub loss: Option<f64>,
    /// Per-class precision
    pub per_class_precision: HashMap<usize, f64>,
    /// Per-class recall
    pub per_class_recall: HashMap<usize, f64>,
    /// Confusion matrix (actual x predicted)
    pub confusion_matrix: Vec<Vec<usize>>,
    /// Total number of samples evaluated
    pub num_samples: usize,
}

impl EvaluationMetrics {
    /// Builds metrics from parallel prediction/target slices.
    pub fn from_predictions(predictions: &[usize], targets: &[usize], num_classes: usize) -> Self {
        let mut confusion_matrix = vec![vec![0usize; num_classes]; num_classes];
        for (&pred, &actual) in predictions.iter().zip(targets.iter()) {
            if actual < num_classes && pred < num_classes {
                confusion_matrix[actual][pred] += 1;
            }
        }

        let num_samples: usize = confusion_matrix.iter().flatten().sum();
        let correct: usize = (0..num_classes).map(|i| confusion_matrix[i][i]).sum();
        let accuracy = if num_samples > 0 {
            correct as f64 / num_samples as f64
        } else {
            0.0
        };

        let mut per_class_precision = HashMap::new();
        let mut per_class_recall = HashMap::new();

        for class_id in 0..num_classes {
            let tp = confusion_matrix[class_id][class_id] as f64;
            let fp: f64 = (0..num_classes)
                .filter(|&i| i != class_id)
                .map(|i| confusion_matrix[i][class_id] as f64)
                .sum();
            let fn_: f64 = (0..num_classes)
                .filter(|&i| i != class_id)
                .map(|i| confusion_matrix[class_id][i] as f64)
                .sum();

            let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
            let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
            per_class_precision.insert(class_id, precision);
            per_class_recall.insert(class_id, recall);
        }

        Self {
            accuracy,
            loss: None,
            per_class_precision,
            per_class_recall,
            confusion_matrix,
            num_samples,
        }
    }

    /// Macro-averaged F1 score across classes
    pub fn macro_f1(&self) -> f64 {
        if self.per_class_precision.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .per_class_precision
            .iter()
            .map(|(class_id, &p)| {
                let r = self.per_class_recall.get(class_id).copied().unwrap_or(0.0);
                if p + r > 0.0 {
                    2.0 * p * r / (p + r)
                } else {
                    0.0
                }
            })
            .sum();
        sum / self.per_class_precision.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_predictions() {
        let predictions = vec![0, 0, 1, 1, 0];
        let targets = vec![0, 0, 1, 1, 1];
        let metrics = EvaluationMetrics::from_predictions(&predictions, &targets, 2);

        assert_eq!(metrics.num_samples, 5);
        assert!((metrics.accuracy - 0.8).abs() < 1e-10);
        assert_eq!(metrics.confusion_matrix[1][0], 1);
    }

    #[test]
    fn test_macro_f1_perfect() {
        let predictions = vec![0, 1, 2];
        let targets = vec![0, 1, 2];
        let metrics = EvaluationMetrics::from_predictions(&predictions, &targets, 3);
        assert!((metrics.macro_f1() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_empty() {
        let metrics = EvaluationMetrics::from_predictions(&[], &[], 2);
        assert_eq!(metrics.num_samples, 0);
        assert_eq!(metrics.accuracy, 0.0);
    }
}
