use num::Float;
use tracing::warn;

use crate::localization::OBJ;
use crate::targets::TargetBatch;
use crate::tensor_ops::sqrt_wh_rows;

/// Predictions above this magnitude usually mean training is diverging.
pub const PREDICTION_MAGNITUDE_LIMIT: f64 = 100.0;

/// Findings of [`check_values`] for one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueReport {
    pub prediction_nan: bool,
    /// Largest prediction if any exceeds [`PREDICTION_MAGNITUDE_LIMIT`].
    pub prediction_too_large: Option<f64>,
    pub target_nan: bool,
    pub scale_nan: bool,
    /// Some objectness target equals exactly 1.
    pub objectness_target_one: bool,
    /// A w or h scale is set where the w or h target is 0.
    pub scale_without_target: bool,
    /// `Σ scale * (prediction - target)²` over the batch.
    pub weighted_error: f64,
}

impl ValueReport {
    pub fn is_clean(&self) -> bool {
        !(self.prediction_nan
            || self.prediction_too_large.is_some()
            || self.target_nan
            || self.scale_nan
            || self.objectness_target_one
            || self.scale_without_target
            || self.weighted_error.is_nan())
    }
}

/// Scale weighted squared error, the quantity the downstream loss minimizes.
pub fn weighted_squared_error(predictions: &[f64], targets: &[f64], scales: &[f64]) -> f64 {
    predictions
        .iter()
        .zip(targets)
        .zip(scales)
        .map(|((p, t), s)| {
            let err = p - t;
            err * err * s
        })
        .sum()
}

/// Sanity checks a batch of predictions against the targets built for it.
///
/// Meant for development, nothing here fails the call. Every finding is
/// logged with `warn!` and returned in the report.
///
/// With `sqrt_wh` the weighted error is measured on square rooted w and h of
/// both predictions and targets, matching a loss built on
/// [`crate::tensor_ops::sqrt_wh`]. A negative predicted w or h then shows up
/// as a NaN error.
pub fn check_values(predictions: &[f64], batch: &TargetBatch, sqrt_wh: bool) -> ValueReport {
    let mut report = ValueReport::default();

    if predictions.iter().any(|v| v.is_nan()) {
        warn!("model output contains NaN");
        report.prediction_nan = true;
    } else {
        let max = predictions.iter().copied().fold(f64::MIN, f64::max);
        if max > PREDICTION_MAGNITUDE_LIMIT {
            warn!(max, "model output exceeds {PREDICTION_MAGNITUDE_LIMIT}");
            report.prediction_too_large = Some(max);
        }
    }

    if batch.targets.iter().any(|v| v.is_nan()) {
        warn!("target contains NaN");
        report.target_nan = true;
    }

    if batch.scales.iter().any(|v| v.is_nan()) {
        warn!("scale contains NaN");
        report.scale_nan = true;
    }

    let len = batch.vector_len();
    for (target, scale) in batch
        .targets
        .chunks_exact(len)
        .zip(batch.scales.chunks_exact(len))
    {
        if target[OBJ] == 1.0 {
            report.objectness_target_one = true;
        }

        if (2..OBJ).any(|i| scale[i] > 0.0 && target[i] == 0.0) {
            report.scale_without_target = true;
        }
    }

    if report.objectness_target_one {
        warn!("objectness target equals 1");
    }

    if report.scale_without_target {
        warn!("w/h scale is > 0 where the target is 0");
    }

    report.weighted_error = if sqrt_wh {
        let len = batch.vector_len();
        weighted_squared_error(
            &sqrt_wh_rows(predictions, len),
            &sqrt_wh_rows(&batch.targets, len),
            &batch.scales,
        )
    } else {
        weighted_squared_error(predictions, &batch.targets, &batch.scales)
    };
    if report.weighted_error.is_nan() {
        warn!("weighted squared error is NaN");
    }

    report
}

// Helper function for comparing floats
pub fn assert_approx_eq<F>(a: &F, b: &F, epsilon: F)
where
    F: Float + std::fmt::Display + std::fmt::Debug,
{
    assert!(
        (*a - *b).abs() <= epsilon,
        "Values differ: {:?} vs {:?} (tolerance: {:?})",
        *a,
        *b,
        epsilon
    );
}
