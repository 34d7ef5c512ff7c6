use std::{fmt, io};

use client::{ClientErr, PartitionErr};
use ml_core::{DataError, MlError};
use server::{CheckpointErr, GroupErr, ServerErr};

use crate::{corruption::AssignmentErr, report::ReportErr};

/// All errors that can occur while setting up or running an experiment.
#[derive(Debug)]
pub enum PipelineError {
    /// Invalid configuration, caught before any round runs.
    InvalidConfig(String),
    Assignment(AssignmentErr),
    Checkpoint(CheckpointErr),
    Data(DataError),
    Partition(PartitionErr),
    Client(ClientErr),
    Group(GroupErr),
    Server(ServerErr),
    Ml(MlError),
    Report(ReportErr),
    Io(io::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Assignment(e) => write!(f, "corruption assignment error: {e}"),
            Self::Checkpoint(e) => write!(f, "checkpoint error: {e}"),
            Self::Data(e) => write!(f, "data error: {e}"),
            Self::Partition(e) => write!(f, "partition error: {e}"),
            Self::Client(e) => write!(f, "client error: {e}"),
            Self::Group(e) => write!(f, "group error: {e}"),
            Self::Server(e) => write!(f, "server error: {e}"),
            Self::Ml(e) => write!(f, "model error: {e}"),
            Self::Report(e) => write!(f, "report error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidConfig(_) => None,
            Self::Assignment(e) => Some(e),
            Self::Checkpoint(e) => Some(e),
            Self::Data(e) => Some(e),
            Self::Partition(e) => Some(e),
            Self::Client(e) => Some(e),
            Self::Group(e) => Some(e),
            Self::Server(e) => Some(e),
            Self::Ml(e) => Some(e),
            Self::Report(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}

macro_rules! impl_from {
    ($($err:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$err> for PipelineError {
                fn from(e: $err) -> Self {
                    Self::$variant(e)
                }
            }
        )*
    };
}

impl_from! {
    AssignmentErr => Assignment,
    CheckpointErr => Checkpoint,
    DataError => Data,
    PartitionErr => Partition,
    ClientErr => Client,
    GroupErr => Group,
    ServerErr => Server,
    MlError => Ml,
    ReportErr => Report,
    io::Error => Io,
}
