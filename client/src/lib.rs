mod client;
pub mod data;
mod error;

pub use client::{Client, ClientState, ClientStats, FeatureIndicator};
pub use data::{Partition, PartitionErr, PartitionSpec, SampleMethod, Split};
pub use error::{ClientErr, Result};
