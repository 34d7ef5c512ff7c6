use log::debug;
use ml_core::{
    AdaptMethod, Batch, Metrics, Model, NormStats,
    stats::{TEST_ACC, classification_metrics},
};
use ndarray::Array1;

use crate::{ClientErr, Result};

/// Summary of a batch's inputs, used to compare clients' data distributions.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureIndicator {
    pub client_id: usize,
    pub mean: Array1<f32>,
    pub samples: usize,
}

/// A client's running normalization statistics after an adaptation step.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientStats {
    pub client_id: usize,
    pub stats: NormStats,
    pub samples: usize,
}

/// Lifecycle of a client's local model.
#[derive(Debug, Clone)]
pub enum ClientState<M> {
    Uninitialized,
    Ready(M),
}

/// A simulated participant holding a private replica of the shared model.
///
/// A client is created `Uninitialized` and becomes `Ready` once a checkpoint
/// is loaded through `init_weight`. Every failing call leaves the client as
/// it was.
#[derive(Debug, Clone)]
pub struct Client<M: Model> {
    client_id: usize,
    method: AdaptMethod,
    state: ClientState<M>,
    last_batch: Option<Batch>,
}

impl<M: Model> Client<M> {
    /// Creates a new `Client` without weights.
    ///
    /// # Arguments
    /// * `client_id` - Identifier used for aggregation and observability.
    /// * `method` - The test-time update run by `adapt`.
    pub fn new(client_id: usize, method: AdaptMethod) -> Self {
        Self {
            client_id,
            method,
            state: ClientState::Uninitialized,
            last_batch: None,
        }
    }

    #[inline]
    pub fn client_id(&self) -> usize {
        self.client_id
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ClientState::Ready(_))
    }

    /// Returns the local model, if any.
    pub fn model(&self) -> Option<&M> {
        match &self.state {
            ClientState::Ready(model) => Some(model),
            ClientState::Uninitialized => None,
        }
    }

    /// Replaces the local model with a private copy of `checkpoint` and
    /// forgets the last batch.
    pub fn init_weight(&mut self, checkpoint: &M) {
        self.state = ClientState::Ready(checkpoint.clone());
        self.last_batch = None;
    }

    fn ready(&self) -> Result<&M> {
        self.model().ok_or(ClientErr::Uninitialized {
            client_id: self.client_id,
        })
    }

    /// Evaluates `batch` with the current model without changing it.
    ///
    /// # Returns
    /// The batch metrics and a summary of the batch's inputs.
    ///
    /// # Errors
    /// Returns `ClientErr::Uninitialized` before `init_weight`, or a model
    /// error if the batch doesn't fit the model.
    pub fn test_source(&self, batch: &Batch) -> Result<(Metrics, FeatureIndicator)> {
        let model = self.ready()?;
        let logits = model.forward(batch.inputs())?;
        let metrics = classification_metrics(logits.view(), batch.labels())?;

        let indicator = FeatureIndicator {
            client_id: self.client_id,
            mean: NormStats::of_batch(batch.inputs())?.mean().clone(),
            samples: batch.len(),
        };

        debug!(client_id = self.client_id; "source acc {:?}", metrics.get(TEST_ACC));
        Ok((metrics, indicator))
    }

    /// Runs one adaptation step on `batch` and keeps it as the last batch.
    ///
    /// # Returns
    /// The updated normalization statistics and the metrics of the logits
    /// produced while adapting.
    ///
    /// # Errors
    /// Returns `ClientErr::Uninitialized` before `init_weight`, or a model
    /// error, in which case neither the model nor the last batch change.
    pub fn adapt(&mut self, batch: Batch) -> Result<(ClientStats, Metrics)> {
        let (stats, metrics) = self.adapt_on(&batch)?;
        self.last_batch = Some(batch);
        Ok((stats, metrics))
    }

    /// Runs one more adaptation step on the last batch.
    ///
    /// # Errors
    /// Returns `ClientErr::NoBatch` if `adapt` never succeeded since the
    /// last `init_weight`.
    pub fn fine_tune(&mut self) -> Result<Metrics> {
        let batch = self.last_batch.take().ok_or(ClientErr::NoBatch {
            client_id: self.client_id,
        })?;

        let res = self.adapt_on(&batch);
        self.last_batch = Some(batch);
        res.map(|(_, metrics)| metrics)
    }

    fn adapt_on(&mut self, batch: &Batch) -> Result<(ClientStats, Metrics)> {
        let mut model = self.ready()?.clone();
        let logits = model.adapt(batch.inputs(), &self.method)?;
        let metrics = classification_metrics(logits.view(), batch.labels())?;

        let stats = ClientStats {
            client_id: self.client_id,
            stats: model.norm_stats(),
            samples: batch.len(),
        };

        self.state = ClientState::Ready(model);
        debug!(client_id = self.client_id; "adapt acc {:?}", metrics.get(TEST_ACC));
        Ok((stats, metrics))
    }

    /// Evaluates the last batch with the current model.
    ///
    /// # Errors
    /// Returns `ClientErr::Uninitialized` before `init_weight` and
    /// `ClientErr::NoBatch` if no batch was adapted on.
    pub fn inference(&self) -> Result<Metrics> {
        let model = self.ready()?;
        let batch = self.last_batch.as_ref().ok_or(ClientErr::NoBatch {
            client_id: self.client_id,
        })?;

        let logits = model.forward(batch.inputs())?;
        Ok(classification_metrics(logits.view(), batch.labels())?)
    }

    /// Returns the current running normalization statistics.
    pub fn norm_stats(&self) -> Result<NormStats> {
        Ok(self.ready()?.norm_stats())
    }

    /// Overwrites the running normalization statistics with aggregated ones.
    pub fn load_norm_stats(&mut self, stats: &NormStats) -> Result<()> {
        match &mut self.state {
            ClientState::Ready(model) => Ok(model.load_norm_stats(stats)?),
            ClientState::Uninitialized => Err(ClientErr::Uninitialized {
                client_id: self.client_id,
            }),
        }
    }

    /// Returns the batch kept by the last successful `adapt`.
    pub fn last_batch(&self) -> Option<&Batch> {
        self.last_batch.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use ml_core::NormLinear;
    use ndarray::array;

    use super::*;

    fn model() -> NormLinear {
        let centers = array![[-1.0_f32, 0.0], [1.0, 0.0]];
        NormLinear::nearest_centroid(centers.view(), NormStats::identity(2)).unwrap()
    }

    fn batch() -> Batch {
        Batch::new(array![[-1.0_f32, 0.2], [1.1, -0.1], [0.9, 0.0]], vec![0, 1, 1]).unwrap()
    }

    #[test]
    fn uninitialized_client_fails_without_side_effects() {
        let mut client = Client::<NormLinear>::new(3, AdaptMethod::Norm { momentum: 1.0 });

        assert!(matches!(
            client.test_source(&batch()),
            Err(ClientErr::Uninitialized { client_id: 3 })
        ));
        assert!(client.adapt(batch()).is_err());
        assert!(client.inference().is_err());
        assert!(!client.is_ready());
        assert!(client.last_batch().is_none());
    }

    #[test]
    fn inference_before_any_batch_fails() {
        let mut client = Client::new(0, AdaptMethod::Norm { momentum: 1.0 });
        client.init_weight(&model());

        assert!(matches!(
            client.inference(),
            Err(ClientErr::NoBatch { client_id: 0 })
        ));
        assert!(matches!(client.fine_tune(), Err(ClientErr::NoBatch { .. })));
    }

    #[test]
    fn test_source_does_not_mutate() {
        let mut client = Client::new(0, AdaptMethod::Norm { momentum: 1.0 });
        client.init_weight(&model());

        let (metrics, indicator) = client.test_source(&batch()).unwrap();

        assert_eq!(metrics[TEST_ACC], 1.0);
        assert_eq!(indicator.samples, 3);
        assert_eq!(client.model(), Some(&model()));
        assert!(client.last_batch().is_none());
    }

    #[test]
    fn adapt_updates_stats_and_keeps_the_batch() {
        let mut client = Client::new(1, AdaptMethod::Norm { momentum: 1.0 });
        client.init_weight(&model());

        let (stats, _) = client.adapt(batch()).unwrap();

        assert_eq!(stats.client_id, 1);
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.stats, NormStats::of_batch(batch().inputs()).unwrap());
        assert_eq!(client.norm_stats().unwrap(), stats.stats);
        assert!(client.inference().is_ok());
    }

    #[test]
    fn failed_adapt_keeps_model_and_batch() {
        let mut client = Client::new(0, AdaptMethod::Norm { momentum: 1.0 });
        client.init_weight(&model());
        client.adapt(batch()).unwrap();
        let before = client.clone();

        let bad_label = Batch::new(array![[0.0_f32, 0.0]], vec![7]).unwrap();
        assert!(client.adapt(bad_label).is_err());

        assert_eq!(client.model(), before.model());
        assert_eq!(
            client.last_batch().map(Batch::labels),
            before.last_batch().map(Batch::labels)
        );
    }

    #[test]
    fn fine_tune_adapts_again_on_the_last_batch() {
        let method = AdaptMethod::Tent {
            lr: 0.5,
            momentum: 1.0,
            steps: std::num::NonZeroUsize::new(1).unwrap(),
        };
        let mut client = Client::new(0, method);
        client.init_weight(&model());
        client.adapt(batch()).unwrap();
        let adapted = client.model().cloned().unwrap();

        let metrics = client.fine_tune().unwrap();

        assert!(metrics.contains_key(TEST_ACC));
        assert_ne!(client.model(), Some(&adapted));
        assert_eq!(client.last_batch().map(Batch::labels), Some(batch().labels()));
        assert!(client.fine_tune().is_ok());
    }

    #[test]
    fn init_weight_resets_to_the_checkpoint() {
        let mut client = Client::new(0, AdaptMethod::Norm { momentum: 1.0 });
        client.init_weight(&model());
        client.adapt(batch()).unwrap();

        client.init_weight(&model());

        assert_eq!(client.model(), Some(&model()));
        assert!(client.last_batch().is_none());
    }
}
