use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Decision threshold on the predicted probability.
pub const CLASSIFICATION_THRESHOLD: f32 = 0.5;

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub auc: f64,
}

impl std::fmt::Display for EpochMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Loss: {:.4}, Accuracy: {:.4}, AUC: {:.4}",
            self.loss, self.accuracy, self.auc
        )
    }
}

/// Fraction of probabilities that land on the correct side of the threshold, a probability of
/// exactly the threshold counts as negative.
pub fn binary_accuracy(probs: &[f32], labels: &[f32]) -> f64 {
    if probs.is_empty() {
        return 0.0;
    }
    let correct = probs
        .iter()
        .zip(labels)
        .filter(|(p, y)| (**p > CLASSIFICATION_THRESHOLD) == (**y >= 0.5))
        .count();
    correct as f64 / probs.len() as f64
}

/// Area under the ROC curve, ties between scores count half.
///
/// Returns 0.5 when only one class is present and the curve is undefined.
pub fn roc_auc(probs: &[f32], labels: &[f32]) -> f64 {
    let mut pairs = probs
        .iter()
        .zip(labels)
        .map(|(p, y)| (*p, *y >= 0.5))
        .collect::<Vec<_>>();
    let positives = pairs.iter().filter(|(_, y)| *y).count();
    let negatives = pairs.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    // Mann-Whitney U with average ranks for ties.
    let mut rank_sum_pos = 0.0f64;
    let mut i = 0;
    while i < pairs.len() {
        let mut j = i;
        while j + 1 < pairs.len() && pairs[j + 1].0 == pairs[i].0 {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        rank_sum_pos += avg_rank * pairs[i..=j].iter().filter(|(_, y)| *y).count() as f64;
        i = j + 1;
    }
    let p = positives as f64;
    let u = rank_sum_pos - p * (p + 1.0) / 2.0;
    u / (p * negatives as f64)
}

/// Collects per-batch loss and predictions over one pass.
#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    weighted_loss: f64,
    probs: Vec<f32>,
    labels: Vec<f32>,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `batch_loss` is the mean loss over the batch.
    pub fn push(&mut self, batch_loss: f32, probs: &[f32], labels: &[f32]) {
        self.weighted_loss += batch_loss as f64 * probs.len() as f64;
        self.probs.extend_from_slice(probs);
        self.labels.extend_from_slice(labels);
    }

    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    pub fn finish(&self) -> EpochMetrics {
        let n = self.probs.len().max(1) as f64;
        EpochMetrics {
            loss: self.weighted_loss / n,
            accuracy: binary_accuracy(&self.probs, &self.labels),
            auc: roc_auc(&self.probs, &self.labels),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::candle_util::approx_equal;

    #[test]
    fn test_accuracy() {
        let probs = [0.9, 0.2, 0.6, 0.4];
        let labels = [1.0, 0.0, 0.0, 0.0];
        approx_equal!(binary_accuracy(&probs, &labels), 0.75, 1e-12);
        approx_equal!(binary_accuracy(&[], &[]), 0.0, 1e-12);
        approx_equal!(binary_accuracy(&[0.5, 0.5], &[1.0, 0.0]), 0.5, 1e-12);
        approx_equal!(binary_accuracy(&[0.5], &[0.0]), 1.0, 1e-12);
    }

    #[test]
    fn test_auc() {
        // Perfect ranking.
        approx_equal!(roc_auc(&[0.1, 0.2, 0.8, 0.9], &[0.0, 0.0, 1.0, 1.0]), 1.0, 1e-12);
        // Inverted ranking.
        approx_equal!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &[0.0, 0.0, 1.0, 1.0]), 0.0, 1e-12);
        // All tied.
        approx_equal!(roc_auc(&[0.5; 4], &[0.0, 1.0, 0.0, 1.0]), 0.5, 1e-12);
        // One of four pairs misordered.
        approx_equal!(roc_auc(&[0.1, 0.7, 0.6, 0.9], &[0.0, 0.0, 1.0, 1.0]), 0.75, 1e-12);
        // Single class.
        approx_equal!(roc_auc(&[0.1, 0.7], &[1.0, 1.0]), 0.5, 1e-12);
    }

    #[test]
    fn test_accumulator_weights_loss_by_batch() {
        let mut acc = MetricsAccumulator::new();
        acc.push(1.0, &[0.9, 0.1, 0.8], &[1.0, 0.0, 1.0]);
        acc.push(3.0, &[0.7], &[0.0]);
        assert_eq!(acc.len(), 4);
        let m = acc.finish();
        approx_equal!(m.loss, 1.5, 1e-12);
        approx_equal!(m.accuracy, 0.75, 1e-12);
        approx_equal!(m.auc, 1.0, 1e-12);
        assert!((0.0..=1.0).contains(&m.accuracy));
    }
}
