pub mod aggregation;
mod error;
pub mod group;
pub mod initialization;
mod server;

pub use error::{CheckpointErr, GroupErr, ServerErr};
pub use group::{CollaborationGraph, Group, GroupKind};
pub use initialization::CheckpointLayout;
pub use server::{ReferenceScore, ReferenceSet, Server};
