//! Weighting rules used to merge clients' normalization statistics.

use client::{ClientStats, FeatureIndicator};
use ml_core::{MlError, NormStats};
use ndarray::{Array2, ArrayView1};

/// Averages the statistics weighted by each client's sample count.
///
/// # Returns
/// `None` when `stats` is empty or every client reports zero samples.
pub fn sample_weighted(stats: &[ClientStats]) -> Result<Option<NormStats>, MlError> {
    NormStats::weighted_mean(stats.iter().map(|s| (&s.stats, s.samples as f64)))
}

/// Averages the statistics with one custom weight per client.
pub fn weighted(stats: &[ClientStats], weights: ArrayView1<'_, f64>) -> Result<Option<NormStats>, MlError> {
    NormStats::weighted_mean(stats.iter().map(|s| &s.stats).zip(weights.iter().copied()))
}

/// Computes how much each participant should borrow from every other one.
///
/// Row `i` holds `softmax_j(cos(f_i, f_j) / temperature)` scaled by each
/// participant's sample count and renormalized to sum to one.
///
/// # Arguments
/// * `indicators` - The participants' feature indicators, all the same length.
/// * `temperature` - A positive softmax temperature.
pub fn similarity_weights(indicators: &[FeatureIndicator], temperature: f64) -> Array2<f64> {
    let n = indicators.len();
    let mut weights = Array2::zeros((n, n));

    for (i, fi) in indicators.iter().enumerate() {
        let logits: Vec<f64> = indicators
            .iter()
            .map(|fj| cosine(fi.mean.view(), fj.mean.view()) / temperature)
            .collect();
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut row = weights.row_mut(i);
        for (j, (w, logit)) in row.iter_mut().zip(&logits).enumerate() {
            *w = (logit - max).exp() * indicators[j].samples as f64;
        }

        let total = row.sum();
        if total > 0.0 {
            row /= total;
        } else {
            row.fill(1.0 / n as f64);
        }
    }

    weights
}

fn cosine(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f64 {
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);

    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }

    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }

    dot / (na.sqrt() * nb.sqrt())
}
