use std::{error::Error, fmt};

use ml_core::{DataError, MlError};

use crate::data::PartitionErr;

/// The client module's result type.
pub type Result<T> = std::result::Result<T, ClientErr>;

/// Client failures.
#[derive(Debug)]
pub enum ClientErr {
    /// The client was used before `init_weight`.
    Uninitialized { client_id: usize },
    /// `inference` was called before any batch was adapted on.
    NoBatch { client_id: usize },
    Partition(PartitionErr),
    Ml(MlError),
    Data(DataError),
}

impl fmt::Display for ClientErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientErr::Uninitialized { client_id } => {
                write!(f, "client {client_id} has no weights loaded")
            }
            ClientErr::NoBatch { client_id } => {
                write!(f, "client {client_id} has not seen any batch yet")
            }
            ClientErr::Partition(e) => write!(f, "partition error: {e}"),
            ClientErr::Ml(e) => write!(f, "model error: {e}"),
            ClientErr::Data(e) => write!(f, "data error: {e}"),
        }
    }
}

impl Error for ClientErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClientErr::Partition(e) => Some(e),
            ClientErr::Ml(e) => Some(e),
            ClientErr::Data(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PartitionErr> for ClientErr {
    fn from(value: PartitionErr) -> Self {
        Self::Partition(value)
    }
}

impl From<MlError> for ClientErr {
    fn from(value: MlError) -> Self {
        Self::Ml(value)
    }
}

impl From<DataError> for ClientErr {
    fn from(value: DataError) -> Self {
        Self::Data(value)
    }
}
