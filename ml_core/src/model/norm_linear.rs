use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::{AdaptMethod, Model, StateDict, Tensor};
use crate::{MlError, NormStats, Result};

const EPS: f32 = 1e-5;

pub const NORM_WEIGHT: &str = "norm.weight";
pub const NORM_BIAS: &str = "norm.bias";
pub const NORM_RUNNING_MEAN: &str = "norm.running_mean";
pub const NORM_RUNNING_VAR: &str = "norm.running_var";
pub const FC_WEIGHT: &str = "fc.weight";
pub const FC_BIAS: &str = "fc.bias";

/// A feature normalization layer followed by a linear classifier.
///
/// ```text
/// z      = (x - mean) / sqrt(var + eps) * weight + bias
/// logits = z · fc_weightᵀ + fc_bias
/// ```
///
/// Inference uses the running `mean`/`var`; adaptation may replace them with
/// batch statistics and update the affine `weight`/`bias`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormLinear {
    weight: Array1<f32>,
    bias: Array1<f32>,
    running: NormStats,
    fc_weight: Array2<f32>,
    fc_bias: Array1<f32>,
}

impl NormLinear {
    /// Creates a model with an identity normalization and a zero classifier.
    ///
    /// # Arguments
    /// * `features` - The length of the input vectors.
    /// * `classes` - The number of output classes.
    pub fn new(features: usize, classes: usize) -> Self {
        Self {
            weight: Array1::ones(features),
            bias: Array1::zeros(features),
            running: NormStats::identity(features),
            fc_weight: Array2::zeros((classes, features)),
            fc_bias: Array1::zeros(classes),
        }
    }

    /// Builds a nearest-centroid classifier in normalized space.
    ///
    /// # Arguments
    /// * `centers` - A `(classes, features)` matrix of class centers.
    /// * `stats` - The statistics of the clean input distribution.
    ///
    /// # Returns
    /// A model whose logits are `-½‖ẑ - ĉ_k‖²` up to a per-sample constant.
    pub fn nearest_centroid(centers: ArrayView2<'_, f32>, stats: NormStats) -> Result<Self> {
        let (classes, features) = centers.dim();

        if stats.dim() != features {
            return Err(MlError::ShapeMismatch {
                what: "statistics",
                got: stats.dim(),
                expected: features,
            });
        }

        let mut model = Self::new(features, classes);
        let normalized = model.normalize(centers, &stats);
        model.fc_bias = normalized
            .rows()
            .into_iter()
            .map(|c| -0.5 * c.dot(&c))
            .collect();
        model.fc_weight = normalized;
        model.running = stats;
        Ok(model)
    }

    fn check_input(&self, x: ArrayView2<'_, f32>) -> Result<()> {
        if x.ncols() != self.num_features() {
            return Err(MlError::ShapeMismatch {
                what: "features",
                got: x.ncols(),
                expected: self.num_features(),
            });
        }

        if x.nrows() == 0 {
            return Err(MlError::InvalidInput("empty batch"));
        }

        Ok(())
    }

    fn normalize(&self, x: ArrayView2<'_, f32>, stats: &NormStats) -> Array2<f32> {
        let std = stats.var().mapv(|v| (v + EPS).sqrt());
        (&x - stats.mean()) / &std
    }

    fn head(&self, x_hat: &Array2<f32>) -> Array2<f32> {
        let z = x_hat * &self.weight + &self.bias;
        z.dot(&self.fc_weight.t()) + &self.fc_bias
    }

    /// Runs one entropy-minimization step and returns the pre-update logits.
    fn tent_step(&mut self, x_hat: &Array2<f32>, lr: f32) -> Array2<f32> {
        let logits = self.head(x_hat);
        let probs = softmax(&logits);
        let log_probs = probs.mapv(|p| p.max(f32::MIN_POSITIVE).ln());
        let entropy = (&probs * &log_probs).sum_axis(Axis(1)).mapv(|h| -h);

        // dH/dlogit_k = -p_k (log p_k + H), averaged over the batch.
        let n = x_hat.nrows() as f32;
        let grad_logits = (&log_probs + &entropy.insert_axis(Axis(1))) * &probs / -n;
        let grad_z = grad_logits.dot(&self.fc_weight);

        let grad_weight = (&grad_z * x_hat).sum_axis(Axis(0));
        let grad_bias = grad_z.sum_axis(Axis(0));

        self.weight.scaled_add(-lr, &grad_weight);
        self.bias.scaled_add(-lr, &grad_bias);
        logits
    }
}

impl Model for NormLinear {
    fn num_features(&self) -> usize {
        self.weight.len()
    }

    fn num_classes(&self) -> usize {
        self.fc_bias.len()
    }

    fn forward(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        self.check_input(x)?;
        let x_hat = self.normalize(x, &self.running);
        Ok(self.head(&x_hat))
    }

    fn adapt(&mut self, x: ArrayView2<'_, f32>, method: &AdaptMethod) -> Result<Array2<f32>> {
        self.check_input(x)?;
        let batch = NormStats::of_batch(x)?;

        match *method {
            AdaptMethod::Norm { momentum } => {
                self.running.blend(&batch, momentum)?;
                self.forward(x)
            }
            AdaptMethod::Tent {
                lr,
                momentum,
                steps,
            } => {
                let x_hat = self.normalize(x, &batch);
                let mut logits = self.tent_step(&x_hat, lr);

                for _ in 1..steps.get() {
                    logits = self.tent_step(&x_hat, lr);
                }

                self.running.blend(&batch, momentum)?;
                Ok(logits)
            }
        }
    }

    fn norm_stats(&self) -> NormStats {
        self.running.clone()
    }

    fn load_norm_stats(&mut self, stats: &NormStats) -> Result<()> {
        if stats.dim() != self.num_features() {
            return Err(MlError::ShapeMismatch {
                what: "statistics",
                got: stats.dim(),
                expected: self.num_features(),
            });
        }

        self.running = stats.clone();
        Ok(())
    }

    fn state_dict(&self) -> StateDict {
        StateDict::from([
            (NORM_WEIGHT.to_string(), Tensor::from_array1(&self.weight)),
            (NORM_BIAS.to_string(), Tensor::from_array1(&self.bias)),
            (
                NORM_RUNNING_MEAN.to_string(),
                Tensor::from_array1(self.running.mean()),
            ),
            (
                NORM_RUNNING_VAR.to_string(),
                Tensor::from_array1(self.running.var()),
            ),
            (FC_WEIGHT.to_string(), Tensor::from_array2(&self.fc_weight)),
            (FC_BIAS.to_string(), Tensor::from_array1(&self.fc_bias)),
        ])
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        let features = self.num_features();
        let classes = self.num_classes();
        let tensor = |name: &str| {
            state
                .get(name)
                .ok_or_else(|| MlError::MissingTensor(name.to_string()))
        };

        let weight = tensor(NORM_WEIGHT)?.to_array1(NORM_WEIGHT, features)?;
        let bias = tensor(NORM_BIAS)?.to_array1(NORM_BIAS, features)?;
        let mean = tensor(NORM_RUNNING_MEAN)?.to_array1(NORM_RUNNING_MEAN, features)?;
        let var = tensor(NORM_RUNNING_VAR)?.to_array1(NORM_RUNNING_VAR, features)?;
        let fc_weight = tensor(FC_WEIGHT)?.to_array2(FC_WEIGHT, classes, features)?;
        let fc_bias = tensor(FC_BIAS)?.to_array1(FC_BIAS, classes)?;

        *self = Self {
            weight,
            bias,
            running: NormStats::new(mean, var)?,
            fc_weight,
            fc_bias,
        };

        Ok(())
    }
}

fn softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();

    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }

    out
}

#[cfg(test)]
fn mean_entropy(logits: &Array2<f32>) -> f32 {
    let probs = softmax(logits);
    let h: f32 = probs
        .iter()
        .map(|&p| if p > 0.0 { -p * p.ln() } else { 0.0 })
        .sum();
    h / logits.nrows() as f32
}
