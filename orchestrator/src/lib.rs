pub mod budget;
pub mod configs;
pub mod corruption;
mod error;
pub mod logging;
pub mod pipeline;
pub mod providers;
pub mod report;

use ml_core::Model;
use server::initialization;

pub use configs::{ExperimentConfig, RawConfig, compile_config};
pub use error::PipelineError;
pub use pipeline::{NoopObserver, Outcome, Pipeline, RoundEvent, RoundObserver};
pub use providers::{DatasetProvider, get_model, provider_for};
pub use report::{ReportErr, Role, ScoreTable};

/// Runs an experiment with the configured data source and checkpoint.
///
/// # Errors
/// Returns a `PipelineError` if the checkpoint can't be loaded, setup fails
/// or any round fails.
pub fn run(config: ExperimentConfig) -> Result<Outcome, PipelineError> {
    log::info!(seed = config.seed; "running {config}");
    let provider = provider_for(&config.data);
    let checkpoint = initialization::load_model(
        &config.model_path,
        config.checkpoint_layout,
        get_model(&config),
    )?;

    log::info!("loaded checkpoint {}", config.model_path.display());
    run_with(config, provider.as_ref(), checkpoint, &mut NoopObserver)
}

/// Runs an experiment with explicit collaborators.
///
/// # Arguments
/// * `config` - The compiled experiment configuration.
/// * `provider` - Where the test sets come from.
/// * `checkpoint` - The pre-trained model.
/// * `observer` - Receives every round event.
pub fn run_with<M: Model>(
    config: ExperimentConfig,
    provider: &dyn DatasetProvider,
    checkpoint: M,
    observer: &mut dyn RoundObserver,
) -> Result<Outcome, PipelineError> {
    Pipeline::setup(config, provider, checkpoint)?.run(observer)
}
