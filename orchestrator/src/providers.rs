//! Dataset and model collaborators resolved from the configuration.

use std::sync::Arc;

use client::Split;
use log::debug;
use ml_core::{
    DataError, Dataset, NormLinear,
    data::{
        npy,
        synthetic::{self, SyntheticCorruption, SyntheticSpec},
    },
};

use crate::configs::{DataConfig, ExperimentConfig, SourceConfig};

/// Identifies one corrupted variant of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorruptionKey<'a> {
    pub corruption: &'a str,
    pub level: u8,
}

/// Loads the clean or corrupted splits of a dataset.
pub trait DatasetProvider {
    /// Returns the requested dataset.
    ///
    /// # Arguments
    /// * `data` - The data section of the configuration.
    /// * `split` - The side of the dataset to load.
    /// * `key` - The corruption and level, or `None` for the clean data.
    fn get_dataset(
        &self,
        data: &DataConfig,
        split: Split,
        key: Option<CorruptionKey<'_>>,
    ) -> Result<Arc<dyn Dataset>, DataError>;
}

/// Generates Gaussian class clusters in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticProvider;

impl SyntheticProvider {
    /// Returns the generator spec of `split`.
    ///
    /// # Errors
    /// Returns `DataError::Format` unless `data.source` is synthetic.
    pub fn spec(data: &DataConfig, split: Split) -> Result<SyntheticSpec, DataError> {
        let SourceConfig::Synthetic {
            samples,
            spread,
            seed,
        } = data.source
        else {
            return Err(DataError::Format(
                "the synthetic provider needs a synthetic source".to_string(),
            ));
        };

        let seed = match split {
            Split::Test => seed,
            Split::Train => seed ^ 0x5eed,
        };

        Ok(SyntheticSpec {
            samples,
            features: data.features,
            classes: data.class_number,
            spread,
            seed,
        })
    }
}

impl DatasetProvider for SyntheticProvider {
    fn get_dataset(
        &self,
        data: &DataConfig,
        split: Split,
        key: Option<CorruptionKey<'_>>,
    ) -> Result<Arc<dyn Dataset>, DataError> {
        let spec = Self::spec(data, split)?;

        let corruption = match key {
            None => None,
            Some(CorruptionKey { corruption, level }) => {
                let kind = SyntheticCorruption::from_name(corruption).ok_or_else(|| {
                    DataError::Format(format!("unknown synthetic corruption `{corruption}`"))
                })?;
                Some((kind, level))
            }
        };

        debug!("generating {:?} split with {corruption:?}", split);
        Ok(Arc::new(synthetic::generate(&spec, corruption)?))
    }
}

/// Reads CIFAR-C style `.npy` files from `data.data_path`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpyProvider;

impl DatasetProvider for NpyProvider {
    fn get_dataset(
        &self,
        data: &DataConfig,
        split: Split,
        key: Option<CorruptionKey<'_>>,
    ) -> Result<Arc<dyn Dataset>, DataError> {
        if split == Split::Train {
            return Err(DataError::Format(
                "npy benchmarks only provide a test split".to_string(),
            ));
        }

        let dataset = match key {
            None => npy::load_origin(&data.data_path, data.samples_per_level)?,
            Some(CorruptionKey { corruption, level }) => {
                npy::load_corrupted(&data.data_path, corruption, level, data.samples_per_level)?
            }
        };

        if dataset.num_features() != data.features {
            return Err(DataError::Format(format!(
                "{} has {} features per sample, expected {}",
                data.data_path.display(),
                dataset.num_features(),
                data.features
            )));
        }

        Ok(Arc::new(dataset))
    }
}

/// Returns the provider matching the configured source.
pub fn provider_for(data: &DataConfig) -> Box<dyn DatasetProvider> {
    match data.source {
        SourceConfig::Npy => Box::new(NpyProvider),
        SourceConfig::Synthetic { .. } => Box::new(SyntheticProvider),
    }
}

/// Returns an untrained model shaped for the configured data.
pub fn get_model(config: &ExperimentConfig) -> NormLinear {
    NormLinear::new(config.data.features, config.data.class_number)
}

/// Builds the nearest-centroid model of a synthetic source.
///
/// # Errors
/// Returns `DataError::Format` unless `data.source` is synthetic.
pub fn synthetic_checkpoint(data: &DataConfig) -> Result<NormLinear, DataError> {
    let spec = SyntheticProvider::spec(data, Split::Test)?;
    let clean = synthetic::generate(&spec, None)?;
    let stats = synthetic::input_stats(&clean)?;

    NormLinear::nearest_centroid(synthetic::centers(&spec)?.view(), stats)
        .map_err(|e| DataError::Format(e.to_string()))
}
