use std::collections::BTreeMap;

use ndarray::{ArrayView2, Axis};

use crate::{MlError, Result};

/// Accuracy key reported by every evaluation.
pub const TEST_ACC: &str = "test_acc";

/// Cross-entropy key reported by every evaluation.
pub const TEST_LOSS: &str = "test_loss";

/// A named set of scalar metrics.
pub type Metrics = BTreeMap<String, f64>;

/// Accumulates weighted scalar samples and reports their weighted means.
///
/// Each call to `append` records one observation, a mapping of metric names to
/// values, together with the weight of that observation (usually the amount of
/// samples it was computed on).
#[derive(Debug, Clone, Default)]
pub struct VariableMonitor {
    samples: Vec<(Metrics, f64)>,
}

impl VariableMonitor {
    /// Creates a new empty `VariableMonitor`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one weighted observation.
    ///
    /// # Arguments
    /// * `sample` - The metric values of this observation.
    /// * `weight` - The weight of this observation.
    pub fn append(&mut self, sample: Metrics, weight: f64) {
        self.samples.push((sample, weight));
    }

    /// Returns the amount of observations recorded so far.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Computes the weight-normalized mean of every metric ever appended.
    ///
    /// # Returns
    /// One entry per metric name. An empty monitor yields an empty mapping and a
    /// metric whose accumulated weight is zero is left out.
    pub fn variable_mean(&self) -> Metrics {
        let mut totals: BTreeMap<&str, (f64, f64)> = BTreeMap::new();

        for (sample, weight) in &self.samples {
            for (name, value) in sample {
                let (sum, total_weight) = totals.entry(name.as_str()).or_default();
                *sum += value * weight;
                *total_weight += weight;
            }
        }

        totals
            .into_iter()
            .filter(|(_, (_, total_weight))| *total_weight != 0.0)
            .map(|(name, (sum, total_weight))| (name.to_string(), sum / total_weight))
            .collect()
    }
}

/// Computes accuracy and mean cross-entropy of a batch of logits.
///
/// # Arguments
/// * `logits` - A `(samples, classes)` matrix of unnormalized scores.
/// * `labels` - The true class of every sample.
///
/// # Returns
/// The `test_acc` and `test_loss` metrics, or an error if the shapes disagree.
pub fn classification_metrics(logits: ArrayView2<'_, f32>, labels: &[usize]) -> Result<Metrics> {
    let (rows, classes) = logits.dim();

    if rows != labels.len() {
        return Err(MlError::ShapeMismatch {
            what: "labels",
            got: labels.len(),
            expected: rows,
        });
    }

    if rows == 0 {
        return Err(MlError::InvalidInput("cannot evaluate an empty batch"));
    }

    let mut correct = 0usize;
    let mut loss = 0.0f64;

    for (row, &label) in logits.axis_iter(Axis(0)).zip(labels) {
        if label >= classes {
            return Err(MlError::ShapeMismatch {
                what: "class id",
                got: label,
                expected: classes,
            });
        }

        let (argmax, max) = row
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
                if v > best.1 { (i, v) } else { best }
            });

        if argmax == label {
            correct += 1;
        }

        let log_sum_exp = row.iter().map(|&v| ((v - max) as f64).exp()).sum::<f64>().ln();
        loss += log_sum_exp - (row[label] - max) as f64;
    }

    let n = rows as f64;
    let metrics = Metrics::from([
        (TEST_ACC.to_string(), correct as f64 / n),
        (TEST_LOSS.to_string(), loss / n),
    ]);

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn sample(acc: f64) -> Metrics {
        Metrics::from([(TEST_ACC.to_string(), acc)])
    }

    #[test]
    fn weighted_mean_of_two_samples() {
        let mut monitor = VariableMonitor::new();
        monitor.append(sample(1.0), 3.0);
        monitor.append(sample(0.5), 1.0);

        let mean = monitor.variable_mean();
        assert!((mean[TEST_ACC] - (1.0 * 3.0 + 0.5 * 1.0) / 4.0).abs() < 1e-12);
    }

    #[test]
    fn empty_monitor_yields_empty_mapping() {
        let monitor = VariableMonitor::new();
        assert!(monitor.is_empty());
        assert!(monitor.variable_mean().is_empty());
    }

    #[test]
    fn metrics_missing_from_some_samples_use_their_own_weights() {
        let mut monitor = VariableMonitor::new();
        monitor.append(sample(1.0), 1.0);
        monitor.append(
            Metrics::from([
                (TEST_ACC.to_string(), 0.0),
                (TEST_LOSS.to_string(), 2.0),
            ]),
            1.0,
        );

        let mean = monitor.variable_mean();
        assert_eq!(mean[TEST_ACC], 0.5);
        assert_eq!(mean[TEST_LOSS], 2.0);
    }

    #[test]
    fn zero_weight_metrics_are_left_out() {
        let mut monitor = VariableMonitor::new();
        monitor.append(sample(1.0), 0.0);
        assert!(monitor.variable_mean().is_empty());
    }

    #[test]
    fn classification_metrics_counts_hits() {
        let logits = array![[2.0_f32, 0.0], [0.0, 2.0], [3.0, 0.0]];
        let metrics = classification_metrics(logits.view(), &[0, 1, 1]).unwrap();

        assert!((metrics[TEST_ACC] - 2.0 / 3.0).abs() < 1e-12);
        assert!(metrics[TEST_LOSS] > 0.0);
    }

    #[test]
    fn classification_metrics_rejects_label_mismatch() {
        let logits = array![[2.0_f32, 0.0]];
        assert!(classification_metrics(logits.view(), &[0, 1]).is_err());
        assert!(classification_metrics(logits.view(), &[2]).is_err());
    }
}
