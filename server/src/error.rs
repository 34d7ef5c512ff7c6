use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use client::ClientErr;
use ml_core::{DataError, MlError};
use safetensors::SafeTensorError;

/// Errors raised while reading or writing a checkpoint.
#[derive(Debug)]
pub enum CheckpointErr {
    Io(io::Error),
    Format(SafeTensorError),
    /// A tensor is stored with a dtype other than `F32`.
    Dtype { name: String },
    /// A nested checkpoint holds no tensor under the expected prefix.
    MissingPrefix(&'static str),
    Ml(MlError),
}

impl Display for CheckpointErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointErr::Io(e) => write!(f, "checkpoint io error: {e}"),
            CheckpointErr::Format(e) => write!(f, "malformed checkpoint: {e}"),
            CheckpointErr::Dtype { name } => write!(f, "tensor {name} is not stored as f32"),
            CheckpointErr::MissingPrefix(prefix) => {
                write!(f, "checkpoint has no tensor under the `{prefix}` prefix")
            }
            CheckpointErr::Ml(e) => write!(f, "checkpoint does not fit the model: {e}"),
        }
    }
}

impl Error for CheckpointErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CheckpointErr::Io(e) => Some(e),
            CheckpointErr::Format(e) => Some(e),
            CheckpointErr::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CheckpointErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SafeTensorError> for CheckpointErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Format(value)
    }
}

impl From<MlError> for CheckpointErr {
    fn from(value: MlError) -> Self {
        Self::Ml(value)
    }
}

/// Errors raised while evaluating the server's reference sets.
#[derive(Debug)]
pub enum ServerErr {
    Data(DataError),
    Ml(MlError),
}

impl Display for ServerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerErr::Data(e) => write!(f, "reference data error: {e}"),
            ServerErr::Ml(e) => write!(f, "reference evaluation error: {e}"),
        }
    }
}

impl Error for ServerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ServerErr::Data(e) => Some(e),
            ServerErr::Ml(e) => Some(e),
        }
    }
}

impl From<DataError> for ServerErr {
    fn from(value: DataError) -> Self {
        Self::Data(value)
    }
}

impl From<MlError> for ServerErr {
    fn from(value: MlError) -> Self {
        Self::Ml(value)
    }
}

/// The group module's result type.
pub type Result<T> = std::result::Result<T, GroupErr>;

/// Errors raised while building a group or aggregating its clients.
#[derive(Debug)]
pub enum GroupErr {
    /// Statistics and feature indicators must come in pairs.
    LengthMismatch { stats: usize, indicators: usize },
    /// The `index`-th statistics and indicator belong to different clients.
    IdMismatch { index: usize, stats: usize, indicator: usize },
    UnknownClient { client_id: usize, clients: usize },
    DuplicateClient { client_id: usize },
    /// Feature indicators of different lengths can't be compared.
    Dimension { got: usize, expected: usize },
    InvalidTemperature(f64),
    Client(ClientErr),
    Ml(MlError),
    Io(io::Error),
    Pickle(serde_pickle::Error),
}

impl Display for GroupErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupErr::LengthMismatch { stats, indicators } => write!(
                f,
                "got {stats} client statistics but {indicators} feature indicators"
            ),
            GroupErr::IdMismatch {
                index,
                stats,
                indicator,
            } => write!(
                f,
                "entry {index} pairs statistics of client {stats} with the indicator of client {indicator}"
            ),
            GroupErr::UnknownClient { client_id, clients } => {
                write!(f, "unknown client {client_id}, the group has {clients}")
            }
            GroupErr::DuplicateClient { client_id } => {
                write!(f, "client {client_id} appears more than once")
            }
            GroupErr::Dimension { got, expected } => write!(
                f,
                "feature indicator dimension mismatch: got {got}, expected {expected}"
            ),
            GroupErr::InvalidTemperature(t) => {
                write!(f, "similarity temperature must be positive, got {t}")
            }
            GroupErr::Client(e) => write!(f, "client error: {e}"),
            GroupErr::Ml(e) => write!(f, "aggregation error: {e}"),
            GroupErr::Io(e) => write!(f, "io error: {e}"),
            GroupErr::Pickle(e) => write!(f, "pickle error: {e}"),
        }
    }
}

impl Error for GroupErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GroupErr::Client(e) => Some(e),
            GroupErr::Ml(e) => Some(e),
            GroupErr::Io(e) => Some(e),
            GroupErr::Pickle(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ClientErr> for GroupErr {
    fn from(value: ClientErr) -> Self {
        Self::Client(value)
    }
}

impl From<MlError> for GroupErr {
    fn from(value: MlError) -> Self {
        Self::Ml(value)
    }
}

impl From<io::Error> for GroupErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_pickle::Error> for GroupErr {
    fn from(value: serde_pickle::Error) -> Self {
        Self::Pickle(value)
    }
}
