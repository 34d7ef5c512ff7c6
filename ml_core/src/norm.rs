use ndarray::{Array1, ArrayView2, Axis};

use crate::{MlError, Result};

/// Per-feature normalization statistics, the state synchronized between
/// clients during federated test-time adaptation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormStats {
    mean: Array1<f32>,
    var: Array1<f32>,
}

impl NormStats {
    /// Creates a new `NormStats`.
    ///
    /// # Returns
    /// An error if `mean` and `var` have different lengths.
    pub fn new(mean: Array1<f32>, var: Array1<f32>) -> Result<Self> {
        if mean.len() != var.len() {
            return Err(MlError::ShapeMismatch {
                what: "variance",
                got: var.len(),
                expected: mean.len(),
            });
        }

        Ok(Self { mean, var })
    }

    /// Statistics of a zero-mean, unit-variance input of `dim` features.
    pub fn identity(dim: usize) -> Self {
        Self {
            mean: Array1::zeros(dim),
            var: Array1::ones(dim),
        }
    }

    /// Computes the biased per-feature statistics of a batch.
    ///
    /// # Arguments
    /// * `x` - A `(samples, features)` matrix with at least one row.
    pub fn of_batch(x: ArrayView2<'_, f32>) -> Result<Self> {
        let mean = x
            .mean_axis(Axis(0))
            .ok_or(MlError::InvalidInput("cannot compute statistics of an empty batch"))?;
        let var = x.var_axis(Axis(0), 0.0);
        Ok(Self { mean, var })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    #[inline]
    pub fn mean(&self) -> &Array1<f32> {
        &self.mean
    }

    #[inline]
    pub fn var(&self) -> &Array1<f32> {
        &self.var
    }

    /// Moves these statistics towards `other` by an exponential moving average.
    ///
    /// # Arguments
    /// * `other` - The newly observed statistics.
    /// * `momentum` - The weight of `other`, `1.0` replaces the current values.
    pub fn blend(&mut self, other: &NormStats, momentum: f32) -> Result<()> {
        self.check_dim(other)?;

        self.mean
            .zip_mut_with(&other.mean, |m, &o| *m = (1.0 - momentum) * *m + momentum * o);
        self.var
            .zip_mut_with(&other.var, |v, &o| *v = (1.0 - momentum) * *v + momentum * o);
        Ok(())
    }

    /// Computes the weighted average of several statistics.
    ///
    /// # Arguments
    /// * `parts` - Pairs of statistics and their non-negative weight.
    ///
    /// # Returns
    /// `None` if there are no parts or all weights are zero, an error on a
    /// dimension mismatch or a negative weight.
    pub fn weighted_mean<'a, I>(parts: I) -> Result<Option<NormStats>>
    where
        I: IntoIterator<Item = (&'a NormStats, f64)>,
    {
        let mut acc: Option<(Array1<f64>, Array1<f64>)> = None;
        let mut total = 0.0;

        for (stats, weight) in parts {
            if weight < 0.0 || !weight.is_finite() {
                return Err(MlError::InvalidInput("aggregation weights must be finite and non-negative"));
            }

            let (mean, var) = acc.get_or_insert_with(|| {
                (Array1::zeros(stats.dim()), Array1::zeros(stats.dim()))
            });

            if mean.len() != stats.dim() {
                return Err(MlError::ShapeMismatch {
                    what: "statistics",
                    got: stats.dim(),
                    expected: mean.len(),
                });
            }

            mean.zip_mut_with(&stats.mean, |a, &m| *a += weight * m as f64);
            var.zip_mut_with(&stats.var, |a, &v| *a += weight * v as f64);
            total += weight;
        }

        let Some((mean, var)) = acc else {
            return Ok(None);
        };

        if total == 0.0 {
            return Ok(None);
        }

        Ok(Some(NormStats {
            mean: mean.mapv(|m| (m / total) as f32),
            var: var.mapv(|v| (v / total) as f32),
        }))
    }

    fn check_dim(&self, other: &NormStats) -> Result<()> {
        if self.dim() != other.dim() {
            return Err(MlError::ShapeMismatch {
                what: "statistics",
                got: other.dim(),
                expected: self.dim(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn weighted_mean_uses_weights() {
        let a = NormStats::new(array![0.0, 2.0], array![1.0, 1.0]).unwrap();
        let b = NormStats::new(array![4.0, 2.0], array![3.0, 1.0]).unwrap();

        let avg = NormStats::weighted_mean([(&a, 3.0), (&b, 1.0)]).unwrap().unwrap();

        assert_eq!(avg.mean(), &array![1.0, 2.0]);
        assert_eq!(avg.var(), &array![1.5, 1.0]);
    }

    #[test]
    fn weighted_mean_of_nothing() {
        assert!(NormStats::weighted_mean([]).unwrap().is_none());

        let a = NormStats::identity(2);
        assert!(NormStats::weighted_mean([(&a, 0.0)]).unwrap().is_none());
    }

    #[test]
    fn weighted_mean_rejects_mixed_dims() {
        let a = NormStats::identity(2);
        let b = NormStats::identity(3);
        assert!(NormStats::weighted_mean([(&a, 1.0), (&b, 1.0)]).is_err());
    }

    #[test]
    fn blend_with_full_momentum_replaces() {
        let mut a = NormStats::identity(2);
        let b = NormStats::new(array![1.0, -1.0], array![4.0, 4.0]).unwrap();

        a.blend(&b, 1.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn batch_statistics_are_biased() {
        let x = array![[1.0_f32, 0.0], [3.0, 0.0]];
        let stats = NormStats::of_batch(x.view()).unwrap();

        assert_eq!(stats.mean(), &array![2.0, 0.0]);
        assert_eq!(stats.var(), &array![1.0, 0.0]);
    }
}
