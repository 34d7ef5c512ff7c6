mod compiler;
mod experiment;

pub use compiler::{
    ADAPT_GROUP, BASE_GROUP, ExperimentConfig, FedPass, RunConfig, base_dataset_name,
    compile_config,
};
pub use experiment::{
    AdaptConfig, AdaptMethodConfig, ClientConfig, DataConfig, GroupConfig, LayoutConfig,
    LearnConfig, OtherConfig, RawConfig, SampleMethodConfig, SourceConfig,
};
