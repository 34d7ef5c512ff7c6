//! Deterministic synthetic classification data with named corruptions.
//!
//! Samples are drawn around per-class centers; a corrupted variant of the same
//! seed shares the clean samples and then applies a named perturbation whose
//! strength grows with the severity level.

use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};

use super::{DataError, InMemoryDataset};
use crate::NormStats;

/// Shape and seed of a synthetic dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticSpec {
    pub samples: usize,
    pub features: usize,
    pub classes: usize,
    /// Standard deviation of every sample around its class center.
    pub spread: f32,
    pub seed: u64,
}

/// A perturbation that can be applied to a synthetic dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticCorruption {
    GaussianNoise,
    ShotNoise,
    ImpulseNoise,
    Brightness,
    Contrast,
}

impl SyntheticCorruption {
    /// Resolves a corruption from its common name.
    pub fn from_name(name: &str) -> Option<Self> {
        let corruption = match name {
            "gaussian" | "gaussian_noise" => Self::GaussianNoise,
            "shot" | "shot_noise" => Self::ShotNoise,
            "impulse" | "impulse_noise" => Self::ImpulseNoise,
            "brightness" => Self::Brightness,
            "contrast" => Self::Contrast,
            _ => return None,
        };

        Some(corruption)
    }

    fn salt(self) -> u64 {
        match self {
            Self::GaussianNoise => 0x9e37_79b9,
            Self::ShotNoise => 0x85eb_ca6b,
            Self::ImpulseNoise => 0xc2b2_ae35,
            Self::Brightness => 0x27d4_eb2f,
            Self::Contrast => 0x1656_67b1,
        }
    }

    fn apply(self, inputs: &mut Array2<f32>, severity: u8, rng: &mut StdRng) -> Result<(), DataError> {
        let s = severity as f32;

        match self {
            Self::GaussianNoise => {
                let noise = normal(0.0, 0.15 * s)?;
                inputs.mapv_inplace(|v| v + noise.sample(rng));
            }
            Self::ShotNoise => {
                let noise = normal(0.0, 0.1 * s)?;
                inputs.mapv_inplace(|v| v + v.abs().sqrt() * noise.sample(rng));
            }
            Self::ImpulseNoise => {
                let p = (0.03 * s).min(1.0) as f64;
                inputs.mapv_inplace(|v| {
                    if rng.random_bool(p) {
                        if rng.random_bool(0.5) { 3.0 } else { -3.0 }
                    } else {
                        v
                    }
                });
            }
            Self::Brightness => inputs.mapv_inplace(|v| v + 0.25 * s),
            Self::Contrast => {
                let Some(mean) = inputs.mean_axis(Axis(0)) else {
                    return Ok(());
                };
                let factor = 1.0 / (1.0 + 0.3 * s);
                *inputs -= &mean;
                inputs.mapv_inplace(|v| v * factor);
                *inputs += &mean;
            }
        }

        Ok(())
    }
}

/// Generates the class centers of `spec`.
///
/// # Returns
/// A `(classes, features)` matrix, identical for every call with the same seed.
pub fn centers(spec: &SyntheticSpec) -> Result<Array2<f32>, DataError> {
    let mut rng = StdRng::seed_from_u64(spec.seed);
    draw_centers(spec, &mut rng)
}

/// Generates a clean or corrupted dataset.
///
/// # Arguments
/// * `spec` - The shape and seed of the data.
/// * `corruption` - An optional corruption and its severity level.
///
/// # Returns
/// A new `InMemoryDataset`; class ids cycle through `0..classes`.
pub fn generate(
    spec: &SyntheticSpec,
    corruption: Option<(SyntheticCorruption, u8)>,
) -> Result<InMemoryDataset, DataError> {
    if spec.classes == 0 || spec.features == 0 {
        return Err(DataError::InvalidSample(
            "synthetic data needs at least one class and one feature",
        ));
    }

    let mut rng = StdRng::seed_from_u64(spec.seed);
    let centers = draw_centers(spec, &mut rng)?;
    let noise = normal(0.0, spec.spread)?;

    let labels: Vec<usize> = (0..spec.samples).map(|i| i % spec.classes).collect();
    let mut inputs = Array2::zeros((spec.samples, spec.features));

    for (mut row, &label) in inputs.rows_mut().into_iter().zip(&labels) {
        row.assign(&centers.row(label));
        row.mapv_inplace(|v| v + noise.sample(&mut rng));
    }

    if let Some((kind, severity)) = corruption {
        let seed = spec.seed ^ kind.salt().wrapping_mul(severity as u64 + 1);
        let mut rng = StdRng::seed_from_u64(seed);
        kind.apply(&mut inputs, severity, &mut rng)?;
    }

    InMemoryDataset::new(inputs, labels)
}

/// Computes the per-feature statistics of a dataset's inputs.
pub fn input_stats(dataset: &InMemoryDataset) -> Result<NormStats, DataError> {
    let inputs = dataset.inputs();
    let mean = inputs
        .mean_axis(Axis(0))
        .ok_or(DataError::InvalidSample("cannot compute statistics of an empty dataset"))?;
    let var: Array1<f32> = inputs.var_axis(Axis(0), 0.0);

    NormStats::new(mean, var).map_err(|_| DataError::InvalidSample("inconsistent statistics"))
}

fn draw_centers(spec: &SyntheticSpec, rng: &mut StdRng) -> Result<Array2<f32>, DataError> {
    let dist = normal(0.0, 1.5)?;
    Ok(Array2::from_shape_simple_fn((spec.classes, spec.features), || dist.sample(rng)))
}

fn normal(mean: f32, std_dev: f32) -> Result<Normal<f32>, DataError> {
    Normal::new(mean, std_dev).map_err(|e| DataError::Format(e.to_string()))
}
