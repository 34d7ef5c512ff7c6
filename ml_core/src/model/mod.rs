mod norm_linear;
mod state;

use std::num::NonZeroUsize;

use ndarray::{Array2, ArrayView2};

pub use norm_linear::{
    FC_BIAS, FC_WEIGHT, NORM_BIAS, NORM_RUNNING_MEAN, NORM_RUNNING_VAR, NORM_WEIGHT, NormLinear,
};
pub use state::{StateDict, Tensor};

use crate::{NormStats, Result};

/// An unsupervised test-time update applied to a model's normalization layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdaptMethod {
    /// Re-estimates the running statistics from each test batch.
    Norm { momentum: f32 },

    /// Minimizes the prediction entropy by gradient descent on the
    /// normalization affine, using batch statistics in the forward pass.
    Tent {
        lr: f32,
        momentum: f32,
        steps: NonZeroUsize,
    },
}

/// A model that can be evaluated and adapted at test time.
///
/// A `Model` owns its parameters and normalization buffers. Cloning a model
/// yields a fully independent copy, which is how every client gets a private
/// replica of a shared checkpoint.
pub trait Model: Clone + Send + Sync {
    /// Returns the length of the input vectors.
    fn num_features(&self) -> usize;

    /// Returns the number of output classes.
    fn num_classes(&self) -> usize;

    /// Computes the logits for `x` with the stored running statistics.
    ///
    /// # Errors
    /// Returns `MlError` if `x` is empty or has the wrong feature count.
    fn forward(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>>;

    /// Runs one test-time adaptation update on `x`.
    ///
    /// # Returns
    /// The logits produced while adapting.
    ///
    /// # Errors
    /// Returns `MlError` if `x` is empty or has the wrong feature count, in
    /// which case the model is left untouched.
    fn adapt(&mut self, x: ArrayView2<'_, f32>, method: &AdaptMethod) -> Result<Array2<f32>>;

    /// Returns a copy of the running normalization statistics.
    fn norm_stats(&self) -> NormStats;

    /// Overwrites the running normalization statistics.
    fn load_norm_stats(&mut self, stats: &NormStats) -> Result<()>;

    /// Exports every parameter and buffer.
    fn state_dict(&self) -> StateDict;

    /// Loads every parameter and buffer, all-or-nothing.
    fn load_state_dict(&mut self, state: &StateDict) -> Result<()>;
}
