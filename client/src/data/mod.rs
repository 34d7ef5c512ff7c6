mod cursor;
pub mod partition;
mod shard;

pub use cursor::{Partition, PartitionErr};
pub use partition::{PartitionSpec, SampleMethod, Split, partition};
pub use shard::balanced_ranges;
