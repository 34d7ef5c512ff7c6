use std::{num::NonZeroUsize, sync::Arc};

use log::debug;
use ml_core::{
    Batch, Dataset, Metrics, Model, NormStats, VariableMonitor, stats::classification_metrics,
};

use crate::ServerErr;

/// A held-out test set for one corruption at one severity level.
#[derive(Clone)]
pub struct ReferenceSet {
    pub corruption: String,
    pub level: u8,
    pub dataset: Arc<dyn Dataset>,
}

impl std::fmt::Debug for ReferenceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceSet")
            .field("corruption", &self.corruption)
            .field("level", &self.level)
            .field("len", &self.dataset.len())
            .finish()
    }
}

/// The scores of one reference set.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceScore {
    pub corruption: String,
    pub level: u8,
    pub metrics: Metrics,
}

/// The central aggregator of a group.
///
/// Holds the reference test sets and the latest aggregated normalization
/// statistics. Only the owning `Group` writes the statistics.
#[derive(Debug, Clone, Default)]
pub struct Server {
    references: Vec<ReferenceSet>,
    global_stats: Option<NormStats>,
}

impl Server {
    /// Creates a new `Server`.
    ///
    /// # Arguments
    /// * `references` - One test set per (corruption, level), in report order.
    pub fn new(references: Vec<ReferenceSet>) -> Self {
        Self {
            references,
            global_stats: None,
        }
    }

    /// Returns the statistics of the last aggregation, if any.
    pub fn global_stats(&self) -> Option<&NormStats> {
        self.global_stats.as_ref()
    }

    pub(crate) fn set_global_stats(&mut self, stats: Option<NormStats>) {
        self.global_stats = stats;
    }

    /// Evaluates `model` on every reference set without modifying it.
    ///
    /// # Arguments
    /// * `model` - The model to evaluate.
    /// * `batch_size` - The amount of samples per forward pass.
    ///
    /// # Returns
    /// One score per reference set, in the order they were given. Empty sets
    /// yield empty metrics.
    pub fn reference_metrics<M: Model>(
        &self,
        model: &M,
        batch_size: NonZeroUsize,
    ) -> Result<Vec<ReferenceScore>, ServerErr> {
        self.references
            .iter()
            .map(|reference| {
                let metrics = evaluate(model, reference.dataset.as_ref(), batch_size)?;

                debug!(
                    level = reference.level;
                    "reference {}: {metrics:?}", reference.corruption
                );

                Ok(ReferenceScore {
                    corruption: reference.corruption.clone(),
                    level: reference.level,
                    metrics,
                })
            })
            .collect()
    }
}

fn evaluate<M: Model>(
    model: &M,
    dataset: &dyn Dataset,
    batch_size: NonZeroUsize,
) -> Result<Metrics, ServerErr> {
    let indices: Vec<usize> = (0..dataset.len()).collect();
    let mut monitor = VariableMonitor::new();

    for chunk in indices.chunks(batch_size.get()) {
        let batch = Batch::gather(dataset, chunk)?;
        let logits = model.forward(batch.inputs())?;
        let metrics = classification_metrics(logits.view(), batch.labels())?;
        monitor.append(metrics, batch.len() as f64);
    }

    Ok(monitor.variable_mean())
}

#[cfg(test)]
mod tests {
    use ml_core::{InMemoryDataset, NormLinear, stats::TEST_ACC};
    use ndarray::array;

    use super::*;

    #[test]
    fn reference_metrics_weights_batches_by_size() {
        let centers = array![[-1.0_f32], [1.0]];
        let model = NormLinear::nearest_centroid(centers.view(), NormStats::identity(1)).unwrap();

        // 5 samples, the last one misclassified.
        let inputs = array![[-1.0_f32], [1.0], [-2.0], [2.0], [3.0]];
        let dataset = InMemoryDataset::new(inputs, vec![0, 1, 0, 1, 0]).unwrap();
        let server = Server::new(vec![ReferenceSet {
            corruption: "contrast".to_string(),
            level: 5,
            dataset: Arc::new(dataset),
        }]);

        let scores = server
            .reference_metrics(&model, NonZeroUsize::new(2).unwrap())
            .unwrap();

        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].level, 5);
        assert!((scores[0].metrics[TEST_ACC] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn global_stats_start_empty() {
        assert!(Server::default().global_stats().is_none());
    }
}
