pub mod data;
mod error;
pub mod model;
mod norm;
pub mod stats;

pub use data::{Batch, DataError, Dataset, InMemoryDataset, Sample};
pub use error::{MlError, Result};
pub use model::{AdaptMethod, Model, NormLinear, StateDict, Tensor};
pub use norm::NormStats;
pub use stats::{Metrics, VariableMonitor};
