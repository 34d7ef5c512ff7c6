use std::fmt;

use ndarray::{Array2, ArrayView1, ArrayView2};

/// Errors produced while accessing dataset samples.
#[derive(Debug)]
pub enum DataError {
    /// The requested sample index is out of bounds.
    OutOfBounds { index: usize, len: usize },

    /// The dataset could not provide a valid sample due to domain constraints.
    InvalidSample(&'static str),

    /// A dataset file could not be read or had an unexpected layout.
    Format(String),

    /// An underlying I/O error.
    Io(std::io::Error),
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::OutOfBounds { index, len } => {
                write!(f, "sample index {index} is out of bounds for a dataset of {len}")
            }
            DataError::InvalidSample(msg) => write!(f, "invalid sample: {msg}"),
            DataError::Format(msg) => write!(f, "dataset format error: {msg}"),
            DataError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for DataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DataError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// A single labelled sample borrowed from a dataset.
#[derive(Debug, Clone, Copy)]
pub struct Sample<'a> {
    pub input: ArrayView1<'a, f32>,
    pub class_id: usize,
}

/// A collection of labelled samples with integer-indexed access.
///
/// A `Dataset` is responsible only for *providing access* to samples, it does
/// not decide how they are partitioned, batched or consumed.
pub trait Dataset: Send + Sync {
    /// Returns the total number of samples.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the length of every sample's input vector.
    fn num_features(&self) -> usize;

    /// Fetches a sample by index.
    ///
    /// # Errors
    /// Returns `DataError::OutOfBounds` if `index` is invalid.
    fn get(&self, index: usize) -> Result<Sample<'_>, DataError>;

    /// Fetches only the class of a sample.
    fn class_id(&self, index: usize) -> Result<usize, DataError> {
        Ok(self.get(index)?.class_id)
    }
}

/// A dataset fully held in memory as a `(samples, features)` matrix.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    inputs: Array2<f32>,
    labels: Vec<usize>,
}

impl InMemoryDataset {
    /// Creates a new dataset from owned buffers.
    ///
    /// # Arguments
    /// * `inputs` - One row per sample.
    /// * `labels` - The class of every row.
    ///
    /// # Returns
    /// An error if the amount of rows and labels differ.
    pub fn new(inputs: Array2<f32>, labels: Vec<usize>) -> Result<Self, DataError> {
        if inputs.nrows() != labels.len() {
            return Err(DataError::InvalidSample(
                "inputs and labels must have the same length",
            ));
        }

        Ok(Self { inputs, labels })
    }

    #[inline]
    pub fn inputs(&self) -> ArrayView2<'_, f32> {
        self.inputs.view()
    }

    #[inline]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn num_features(&self) -> usize {
        self.inputs.ncols()
    }

    fn get(&self, index: usize) -> Result<Sample<'_>, DataError> {
        let class_id = *self.labels.get(index).ok_or(DataError::OutOfBounds {
            index,
            len: self.labels.len(),
        })?;

        Ok(Sample {
            input: self.inputs.row(index),
            class_id,
        })
    }

    fn class_id(&self, index: usize) -> Result<usize, DataError> {
        self.labels
            .get(index)
            .copied()
            .ok_or(DataError::OutOfBounds {
                index,
                len: self.labels.len(),
            })
    }
}

/// An owned batch of samples gathered from a dataset.
#[derive(Debug, Clone)]
pub struct Batch {
    inputs: Array2<f32>,
    labels: Vec<usize>,
}

impl Batch {
    /// Creates a new batch from owned buffers.
    ///
    /// # Returns
    /// An error if the amount of rows and labels differ.
    pub fn new(inputs: Array2<f32>, labels: Vec<usize>) -> Result<Self, DataError> {
        if inputs.nrows() != labels.len() {
            return Err(DataError::InvalidSample(
                "inputs and labels must have the same length",
            ));
        }

        Ok(Self { inputs, labels })
    }

    /// Copies the samples at `indices` out of `dataset`.
    ///
    /// # Arguments
    /// * `dataset` - The dataset to read from.
    /// * `indices` - The sample indices, in batch order.
    ///
    /// # Returns
    /// The gathered batch or the first sample access error.
    pub fn gather(dataset: &dyn Dataset, indices: &[usize]) -> Result<Self, DataError> {
        let features = dataset.num_features();
        let mut inputs = Array2::zeros((indices.len(), features));
        let mut labels = Vec::with_capacity(indices.len());

        for (mut row, &index) in inputs.rows_mut().into_iter().zip(indices) {
            let sample = dataset.get(index)?;

            if sample.input.len() != features {
                return Err(DataError::InvalidSample(
                    "sample length differs from the dataset's feature count",
                ));
            }

            row.assign(&sample.input);
            labels.push(sample.class_id);
        }

        Ok(Self { inputs, labels })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn inputs(&self) -> ArrayView2<'_, f32> {
        self.inputs.view()
    }

    #[inline]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn dataset_basic() {
        let ds = InMemoryDataset::new(array![[1.0, 2.0], [3.0, 4.0]], vec![0, 1]).unwrap();

        assert_eq!(ds.len(), 2);
        assert_eq!(ds.num_features(), 2);
        assert_eq!(ds.get(1).unwrap().input, array![3.0, 4.0]);
        assert_eq!(ds.class_id(0).unwrap(), 0);
        assert!(matches!(
            ds.get(2),
            Err(DataError::OutOfBounds { index: 2, len: 2 })
        ));
    }

    #[test]
    fn dataset_rejects_label_mismatch() {
        assert!(InMemoryDataset::new(array![[1.0]], vec![0, 1]).is_err());
    }

    #[test]
    fn batch_gather_follows_index_order() {
        let ds = InMemoryDataset::new(array![[0.0], [1.0], [2.0]], vec![5, 6, 7]).unwrap();
        let batch = Batch::gather(&ds, &[2, 0]).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.inputs(), array![[2.0], [0.0]]);
        assert_eq!(batch.labels(), &[7, 5]);
    }
}
