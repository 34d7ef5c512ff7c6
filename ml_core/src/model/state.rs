use std::collections::BTreeMap;

use ndarray::{Array1, Array2};

use crate::{MlError, Result};

/// A named collection of tensors, the portable form of a model's state.
pub type StateDict = BTreeMap<String, Tensor>;

/// A dense row-major `f32` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a new `Tensor`.
    ///
    /// # Returns
    /// An error if the product of `shape` differs from `data.len()`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected = shape.iter().product::<usize>();

        if expected != data.len() {
            return Err(MlError::ShapeMismatch {
                what: "tensor data",
                got: data.len(),
                expected,
            });
        }

        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn from_array1(array: &Array1<f32>) -> Self {
        Self {
            shape: vec![array.len()],
            data: array.to_vec(),
        }
    }

    pub(crate) fn from_array2(array: &Array2<f32>) -> Self {
        Self {
            shape: vec![array.nrows(), array.ncols()],
            data: array.iter().copied().collect(),
        }
    }

    pub(crate) fn to_array1(&self, name: &str, len: usize) -> Result<Array1<f32>> {
        self.expect_shape(name, &[len])?;
        Ok(Array1::from_vec(self.data.clone()))
    }

    pub(crate) fn to_array2(&self, name: &str, rows: usize, cols: usize) -> Result<Array2<f32>> {
        self.expect_shape(name, &[rows, cols])?;
        Array2::from_shape_vec((rows, cols), self.data.clone())
            .map_err(|_| MlError::InvalidInput("tensor data does not fit its shape"))
    }

    fn expect_shape(&self, name: &str, shape: &[usize]) -> Result<()> {
        if self.shape != shape {
            log::warn!("tensor {name} has shape {:?}, expected {shape:?}", self.shape);

            return Err(MlError::ShapeMismatch {
                what: "tensor shape",
                got: self.data.len(),
                expected: shape.iter().product(),
            });
        }

        Ok(())
    }
}
