mod checkpoint;

pub use checkpoint::{CheckpointLayout, NESTED_PREFIX, load_checkpoint, load_model, save_checkpoint};
