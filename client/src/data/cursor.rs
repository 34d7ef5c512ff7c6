use std::{fmt, sync::Arc};

use ml_core::{Batch, DataError, Dataset};

/// Errors produced while consuming a partition.
#[derive(Debug)]
pub enum PartitionErr {
    /// More indices were requested than the partition has left.
    Exhausted { requested: usize, available: usize },
    /// The partitioning request can't be satisfied.
    InvalidSpec(String),
    /// A partition index could not be read from the underlying dataset.
    Data(DataError),
}

impl fmt::Display for PartitionErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionErr::Exhausted {
                requested,
                available,
            } => write!(
                f,
                "partition exhausted: requested {requested} samples, {available} left"
            ),
            PartitionErr::InvalidSpec(msg) => write!(f, "invalid partition spec: {msg}"),
            PartitionErr::Data(e) => write!(f, "partition data error: {e}"),
        }
    }
}

impl std::error::Error for PartitionErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PartitionErr::Data(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DataError> for PartitionErr {
    fn from(value: DataError) -> Self {
        Self::Data(value)
    }
}

/// One client's share of a dataset, consumed front to back.
///
/// The partition keeps a read-only handle to the whole dataset plus the
/// ordered indices assigned to the client and a cursor into them. Indices
/// before the cursor have been handed out and are never handed out again
/// unless the partition is `reset`.
#[derive(Clone)]
pub struct Partition {
    dataset: Arc<dyn Dataset>,
    indices: Vec<usize>,
    cursor: usize,
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("dataset_len", &self.dataset.len())
            .field("indices", &self.indices.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Partition {
    /// Creates a new `Partition` with its cursor at the front.
    ///
    /// # Arguments
    /// * `dataset` - The dataset the indices refer to.
    /// * `indices` - The indices assigned to this partition, in consumption order.
    pub fn new(dataset: Arc<dyn Dataset>, indices: Vec<usize>) -> Self {
        Self {
            dataset,
            indices,
            cursor: 0,
        }
    }

    /// Returns the total amount of indices, consumed or not.
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Returns the amount of indices not yet consumed.
    #[inline]
    pub fn available(&self) -> usize {
        self.indices.len() - self.cursor
    }

    #[inline]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Moves the cursor back to the front.
    #[inline]
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Consumes the next `n` indices.
    ///
    /// # Returns
    /// The consumed indices, or `PartitionErr::Exhausted` if fewer than `n`
    /// remain, in which case the cursor doesn't move.
    pub fn take(&mut self, n: usize) -> Result<&[usize], PartitionErr> {
        let available = self.available();

        if n > available {
            return Err(PartitionErr::Exhausted {
                requested: n,
                available,
            });
        }

        let start = self.cursor;
        self.cursor += n;
        Ok(&self.indices[start..self.cursor])
    }

    /// Consumes the next `n` indices and gathers their samples.
    ///
    /// # Returns
    /// The batch, or an error without moving the cursor.
    pub fn take_batch(&mut self, n: usize) -> Result<Batch, PartitionErr> {
        let available = self.available();

        if n > available {
            return Err(PartitionErr::Exhausted {
                requested: n,
                available,
            });
        }

        let batch = Batch::gather(
            self.dataset.as_ref(),
            &self.indices[self.cursor..self.cursor + n],
        )?;
        self.cursor += n;
        Ok(batch)
    }
}
