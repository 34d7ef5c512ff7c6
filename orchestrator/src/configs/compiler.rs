use std::{fmt, fs, num::NonZeroUsize, path::PathBuf};

use client::{PartitionSpec, SampleMethod};
use ml_core::AdaptMethod;
use server::{CheckpointLayout, GroupKind};

use super::{
    AdaptMethodConfig, DataConfig, LayoutConfig, RawConfig, SampleMethodConfig, SourceConfig,
};
use crate::PipelineError;

/// The group variant that personalizes aggregation.
pub const ADAPT_GROUP: &str = "adapt_group";

/// The group variant that broadcasts one average.
pub const BASE_GROUP: &str = "base_group";

/// What each participant does after an aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FedPass {
    /// Adapts once more on its own last batch.
    FineTune,
    /// Re-evaluates its last batch.
    InferenceOnly,
}

impl FedPass {
    /// Resolves the pass from a method name; names containing `ft` fine-tune.
    pub fn from_method(method: &str) -> Self {
        if method.contains("ft") {
            Self::FineTune
        } else {
            Self::InferenceOnly
        }
    }
}

/// The round schedule of the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    pub ttt_batch: NonZeroUsize,
    pub loops: NonZeroUsize,
    /// Keep client state across corruption slots.
    pub is_continue: bool,
    /// Keep client state across inner steps.
    pub online: bool,
    /// Aggregate after every inner step.
    pub is_average: bool,
    /// Read the corruption assignment from `data.partition_path`.
    pub niid: bool,
}

/// A validated experiment configuration, immutable for the run.
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    pub data: DataConfig,
    /// `data.dataset` without its corruption-suite suffix.
    pub base_dataset: String,
    pub partition: PartitionSpec,
    pub sample_rate: f64,
    pub group: GroupKind,
    pub adapt: AdaptMethod,
    pub evaluate_source: bool,
    pub fed_pass: FedPass,
    pub run: RunConfig,
    pub eval_batch_size: NonZeroUsize,
    pub model_path: PathBuf,
    pub pre_trained: String,
    pub checkpoint_layout: CheckpointLayout,
    pub logging_path: PathBuf,
    pub seed: u64,
}

impl ExperimentConfig {
    #[inline]
    pub fn client_num(&self) -> usize {
        self.partition.client_num.get()
    }
}

impl fmt::Display for ExperimentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} clients, {:?}, {:?}, {} corruptions x {} levels)",
            self.base_dataset,
            self.client_num(),
            self.group,
            self.fed_pass,
            self.data.corruption.len(),
            self.data.level.len()
        )
    }
}

/// Strips a trailing `_suffix` from a dataset name, e.g. `cifar10_c` into
/// `cifar10`.
pub fn base_dataset_name(name: &str) -> &str {
    match name.rfind('_') {
        Some(pos) => &name[..pos],
        None => name,
    }
}

/// Validates a raw configuration and resolves its defaults.
///
/// Creates the logging directory as a side effect.
///
/// # Arguments
/// * `raw` - The configuration as read from disk.
/// * `seed` - Overrides `raw.seed` when given.
///
/// # Errors
/// Returns `PipelineError::InvalidConfig` naming the first offending field,
/// or `PipelineError::Io` if the logging directory can't be created.
pub fn compile_config(raw: RawConfig, seed: Option<u64>) -> Result<ExperimentConfig, PipelineError> {
    validate(&raw)?;

    let RawConfig {
        data,
        client,
        group,
        adapt,
        learn,
        other,
        seed: raw_seed,
    } = raw;

    let group = match group.name.as_str() {
        BASE_GROUP => GroupKind::Base,
        ADAPT_GROUP => GroupKind::Adaptive {
            temperature: group.temperature,
        },
        name => return Err(invalid(format!("unknown group `{name}`"))),
    };

    let adapt_method = match adapt.name {
        AdaptMethodConfig::Norm => AdaptMethod::Norm {
            momentum: learn.momentum,
        },
        AdaptMethodConfig::Tent => AdaptMethod::Tent {
            lr: learn.lr,
            momentum: learn.momentum,
            steps: non_zero(learn.steps, "learn.steps")?,
        },
    };

    let checkpoint_layout = match other.checkpoint_layout {
        Some(LayoutConfig::Flat) => CheckpointLayout::Flat,
        Some(LayoutConfig::Nested) => CheckpointLayout::Nested,
        None => CheckpointLayout::infer(&other.pre_trained, data.class_number),
    };

    let partition = PartitionSpec {
        client_num: non_zero(client.client_num, "client.client_num")?,
        sample_method: sample_method(data.sample_method),
        test_sample_method: data.test_sample_method.map(sample_method),
    };

    let run = RunConfig {
        ttt_batch: non_zero(other.ttt_batch, "other.ttt_batch")?,
        loops: non_zero(other.loops, "other.loop")?,
        is_continue: other.is_continue,
        online: other.online,
        is_average: other.is_average,
        niid: other.niid,
    };

    fs::create_dir_all(&other.logging_path)?;

    let config = ExperimentConfig {
        base_dataset: base_dataset_name(&data.dataset).to_string(),
        data,
        partition,
        sample_rate: client.sample_rate,
        group,
        adapt: adapt_method,
        evaluate_source: adapt.evaluate_source,
        fed_pass: FedPass::from_method(&other.method),
        run,
        eval_batch_size: non_zero(learn.batch_size, "learn.batch_size")?,
        model_path: other.model_path,
        pre_trained: other.pre_trained,
        checkpoint_layout,
        logging_path: other.logging_path,
        seed: seed.unwrap_or(raw_seed),
    };

    Ok(config)
}

fn validate(raw: &RawConfig) -> Result<(), PipelineError> {
    let data = &raw.data;

    if data.corruption.is_empty() {
        return Err(invalid("data.corruption must list at least one corruption"));
    }

    if data.level.is_empty() {
        return Err(invalid("data.level must list at least one level"));
    }

    if data.class_number == 0 {
        return Err(invalid("data.class_number must be greater than 0"));
    }

    if data.features == 0 {
        return Err(invalid("data.features must be greater than 0"));
    }

    if let SourceConfig::Synthetic { samples, spread, .. } = data.source {
        if samples == 0 {
            return Err(invalid("data.source.synthetic.samples must be greater than 0"));
        }
        if !(spread >= 0.0 && spread.is_finite()) {
            return Err(invalid("data.source.synthetic.spread must be finite and non-negative"));
        }
    }

    for method in std::iter::once(&data.sample_method).chain(&data.test_sample_method) {
        if let SampleMethodConfig::Dirichlet { alpha } = *method {
            if !(alpha > 0.0 && alpha.is_finite()) {
                return Err(invalid(format!("dirichlet alpha must be positive, got {alpha}")));
            }
        }
    }

    let rate = raw.client.sample_rate;
    if !(rate > 0.0 && rate <= 1.0) {
        return Err(invalid(format!("client.sample_rate must be in (0, 1], got {rate}")));
    }

    if raw.group.name == ADAPT_GROUP
        && !(raw.group.temperature > 0.0 && raw.group.temperature.is_finite())
    {
        return Err(invalid("group.temperature must be positive"));
    }

    let learn = &raw.learn;
    if !(learn.lr > 0.0 && learn.lr.is_finite()) {
        return Err(invalid(format!("learn.lr must be finite and positive, got {}", learn.lr)));
    }

    if !(0.0..=1.0).contains(&learn.momentum) {
        return Err(invalid(format!(
            "learn.momentum must be in [0, 1], got {}",
            learn.momentum
        )));
    }

    if raw.other.niid && data.partition_path.is_none() {
        return Err(invalid("other.niid requires data.partition_path"));
    }

    Ok(())
}

fn sample_method(config: SampleMethodConfig) -> SampleMethod {
    match config {
        SampleMethodConfig::Iid => SampleMethod::Iid,
        SampleMethodConfig::Dirichlet { alpha } => SampleMethod::Dirichlet { alpha },
    }
}

fn non_zero(value: usize, field: &str) -> Result<NonZeroUsize, PipelineError> {
    NonZeroUsize::new(value).ok_or_else(|| invalid(format!("{field} must be greater than 0")))
}

fn invalid(msg: impl Into<String>) -> PipelineError {
    PipelineError::InvalidConfig(msg.into())
}

#[cfg(test)]
mod tests {
    use std::{env, process};

    use super::*;

    fn raw(name: &str) -> RawConfig {
        let logging_path = env::temp_dir().join(format!("fedtta-{}-config-{name}", process::id()));
        let json = serde_json::json!({
            "data": {
                "dataset": "cifar10_c",
                "source": { "synthetic": { "samples": 20 } },
                "corruption": ["gaussian_noise"],
                "level": [5],
                "class_number": 10,
                "features": 8
            },
            "other": {
                "ttt_batch": 5,
                "model_path": "model.safetensors",
                "logging_path": logging_path
            }
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn defaults_are_resolved() {
        let config = compile_config(raw("defaults"), None).unwrap();

        assert_eq!(config.base_dataset, "cifar10");
        assert_eq!(config.client_num(), 1);
        assert_eq!(config.sample_rate, 1.0);
        assert_eq!(config.group, GroupKind::Base);
        assert_eq!(config.adapt, AdaptMethod::Norm { momentum: 1.0 });
        assert_eq!(config.fed_pass, FedPass::InferenceOnly);
        assert_eq!(config.run.loops.get(), 1);
        assert!(config.run.is_continue && config.run.online && config.run.is_average);
        assert_eq!(config.checkpoint_layout, CheckpointLayout::Flat);
        assert!(config.logging_path.is_dir());
    }

    #[test]
    fn seed_override_wins() {
        let mut raw = raw("seed");
        raw.seed = 3;

        assert_eq!(compile_config(raw.clone(), None).unwrap().seed, 3);
        assert_eq!(compile_config(raw, Some(9)).unwrap().seed, 9);
    }

    #[test]
    fn layout_is_inferred_from_the_backbone() {
        let mut raw = raw("layout");
        raw.data.class_number = 100;
        raw.other.pre_trained = "wideresnet28".to_string();

        let config = compile_config(raw, None).unwrap();
        assert_eq!(config.checkpoint_layout, CheckpointLayout::Nested);
    }

    #[test]
    fn invalid_fields_are_rejected() {
        let cases: Vec<fn(&mut RawConfig)> = vec![
            |r| r.data.corruption.clear(),
            |r| r.data.level.clear(),
            |r| r.data.class_number = 0,
            |r| r.client.client_num = 0,
            |r| r.client.sample_rate = 0.0,
            |r| r.client.sample_rate = 1.5,
            |r| r.other.ttt_batch = 0,
            |r| r.other.loops = 0,
            |r| r.group.name = "mystery".to_string(),
            |r| r.other.niid = true,
            |r| r.data.sample_method = SampleMethodConfig::Dirichlet { alpha: -1.0 },
            |r| r.learn.lr = f32::NAN,
            |r| r.learn.lr = 0.0,
            |r| r.learn.momentum = f32::NAN,
            |r| r.learn.momentum = 1.5,
            |r| r.learn.momentum = -0.1,
        ];

        for (i, mutate) in cases.into_iter().enumerate() {
            let mut raw = raw("invalid");
            mutate(&mut raw);
            assert!(
                matches!(compile_config(raw, None), Err(PipelineError::InvalidConfig(_))),
                "case {i} was accepted"
            );
        }
    }

    #[test]
    fn boundary_momentum_is_accepted() {
        for momentum in [0.0, 1.0] {
            let mut raw = raw("momentum");
            raw.learn.momentum = momentum;
            assert!(compile_config(raw, None).is_ok(), "momentum {momentum}");
        }
    }

    #[test]
    fn display_summarizes_the_run() {
        let mut raw = raw("display");
        raw.client.client_num = 3;
        raw.other.method = "tent_ft".to_string();

        let config = compile_config(raw, None).unwrap();
        assert_eq!(
            config.to_string(),
            "cifar10 (3 clients, Base, FineTune, 1 corruptions x 1 levels)"
        );
    }

    #[test]
    fn fed_pass_and_group_names() {
        assert_eq!(FedPass::from_method("tent_ft"), FedPass::FineTune);
        assert_eq!(FedPass::from_method("fedtta"), FedPass::InferenceOnly);
        assert_eq!(base_dataset_name("cifar100_c"), "cifar100");
        assert_eq!(base_dataset_name("synthetic"), "synthetic");
    }
}
