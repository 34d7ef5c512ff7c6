mod dataset;
pub mod npy;
pub mod synthetic;

pub use dataset::{Batch, DataError, Dataset, InMemoryDataset, Sample};
