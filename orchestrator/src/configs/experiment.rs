use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The raw configuration of an experiment, as read from JSON.
///
/// Sections mirror the usual layout of federated TTA experiment files. Every
/// field a run can do without has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfig {
    pub data: DataConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub group: GroupConfig,
    #[serde(default)]
    pub adapt: AdaptConfig,
    #[serde(default)]
    pub learn: LearnConfig,
    pub other: OtherConfig,
    #[serde(default)]
    pub seed: u64,
}

/// Where the test data comes from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceConfig {
    /// CIFAR-C style `.npy` files under `data_path`.
    Npy,
    /// Gaussian class clusters generated in memory.
    Synthetic {
        samples: usize,
        #[serde(default = "default_spread")]
        spread: f32,
        #[serde(default)]
        seed: u64,
    },
}

/// How a dataset is spread among clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleMethodConfig {
    Iid,
    Dirichlet { alpha: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// The dataset name, possibly carrying a corruption-suite suffix such as
    /// `cifar10_c`.
    pub dataset: String,
    #[serde(default)]
    pub data_path: PathBuf,
    pub source: SourceConfig,
    pub corruption: Vec<String>,
    pub level: Vec<u8>,
    pub class_number: usize,
    /// The length of a flattened input sample.
    pub features: usize,
    #[serde(default = "default_samples_per_level")]
    pub samples_per_level: usize,
    #[serde(default = "default_sample_method")]
    pub sample_method: SampleMethodConfig,
    #[serde(default)]
    pub test_sample_method: Option<SampleMethodConfig>,
    /// The persisted corruption assignment used when `other.niid` is set.
    #[serde(default)]
    pub partition_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_num")]
    pub client_num: usize,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_num: default_client_num(),
            sample_rate: default_sample_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    /// `base_group` or `adapt_group`.
    #[serde(default = "default_group_name")]
    pub name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            name: default_group_name(),
            temperature: default_temperature(),
        }
    }
}

/// The test-time update run by every client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptMethodConfig {
    Norm,
    Tent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptConfig {
    #[serde(default = "default_adapt_method")]
    pub name: AdaptMethodConfig,
    /// Evaluates the un-adapted checkpoint on every reference set first.
    #[serde(default)]
    pub evaluate_source: bool,
}

impl Default for AdaptConfig {
    fn default() -> Self {
        Self {
            name: default_adapt_method(),
            evaluate_source: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnConfig {
    /// The batch size of reference evaluations.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_lr")]
    pub lr: f32,
    #[serde(default = "default_momentum")]
    pub momentum: f32,
    #[serde(default = "default_steps")]
    pub steps: usize,
}

impl Default for LearnConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            lr: default_lr(),
            momentum: default_momentum(),
            steps: default_steps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtherConfig {
    /// The method name; a name containing `ft` adapts again after aggregation.
    #[serde(default = "default_method")]
    pub method: String,
    pub ttt_batch: usize,
    #[serde(rename = "loop", default = "default_loop")]
    pub loops: usize,
    #[serde(default = "default_true")]
    pub is_continue: bool,
    #[serde(default = "default_true")]
    pub online: bool,
    #[serde(default = "default_true")]
    pub is_average: bool,
    #[serde(default)]
    pub niid: bool,
    pub model_path: PathBuf,
    #[serde(default)]
    pub pre_trained: String,
    /// `flat` or `nested`; inferred from `pre_trained` when unset.
    #[serde(default)]
    pub checkpoint_layout: Option<LayoutConfig>,
    pub logging_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutConfig {
    Flat,
    Nested,
}

fn default_spread() -> f32 {
    0.5
}

fn default_samples_per_level() -> usize {
    10_000
}

fn default_sample_method() -> SampleMethodConfig {
    SampleMethodConfig::Iid
}

fn default_client_num() -> usize {
    1
}

fn default_sample_rate() -> f64 {
    1.0
}

fn default_group_name() -> String {
    "base_group".to_string()
}

fn default_temperature() -> f64 {
    0.1
}

fn default_adapt_method() -> AdaptMethodConfig {
    AdaptMethodConfig::Norm
}

fn default_batch_size() -> usize {
    64
}

fn default_lr() -> f32 {
    1e-3
}

fn default_momentum() -> f32 {
    1.0
}

fn default_steps() -> usize {
    1
}

fn default_method() -> String {
    "fedtta".to_string()
}

fn default_loop() -> usize {
    1
}

fn default_true() -> bool {
    true
}
