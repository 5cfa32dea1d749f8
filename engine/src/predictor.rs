//! Advisory step-count predictors.
//!
//! A predictor is consulted once per worker before it runs. Its answer is
//! reported through telemetry and nowhere else; a failing predictor never
//! changes what the engine does.

use crate::error::PredictorError;
use crate::pipeline::reference_steps;

/// Estimates how many reduction steps a start value needs.
pub trait Predictor: Send + Sync {
    /// Returns the estimated step count for `start`.
    ///
    /// # Errors
    ///
    /// Returns [`PredictorError`] when no estimate can be produced.
    fn predict(&self, start: u64) -> Result<f64, PredictorError>;
}

impl<F> Predictor for F
where
    F: Fn(u64) -> Result<f64, PredictorError> + Send + Sync,
{
    fn predict(&self, start: u64) -> Result<f64, PredictorError> {
        (self)(start)
    }
}

/// Predictor that is never available.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailablePredictor;

impl Predictor for UnavailablePredictor {
    fn predict(&self, _start: u64) -> Result<f64, PredictorError> {
        Err(PredictorError::Unavailable)
    }
}

/// Exact oracle: runs the canonical reduction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferencePredictor;

impl Predictor for ReferencePredictor {
    fn predict(&self, start: u64) -> Result<f64, PredictorError> {
        reference_steps(start)
            .map(|steps| steps as f64)
            .ok_or(PredictorError::NonFinite { start })
    }
}

/// Ordinary least-squares line `steps ≈ slope * start + intercept`, fitted on
/// reference step counts over a training range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearPredictor {
    model: Option<(f64, f64)>,
}

impl LinearPredictor {
    /// Default training range.
    pub const DEFAULT_TRAINING: std::ops::Range<u64> = 2..1000;

    /// Fits on every start value in `range`.
    ///
    /// An empty or single-point range leaves the predictor unfitted.
    pub fn fit(range: std::ops::Range<u64>) -> Self {
        let points: Vec<(f64, f64)> = range
            .filter_map(|n| reference_steps(n).map(|s| (n as f64, s as f64)))
            .collect();
        Self {
            model: least_squares(&points),
        }
    }

    /// Fits on [`Self::DEFAULT_TRAINING`].
    pub fn fit_default() -> Self {
        Self::fit(Self::DEFAULT_TRAINING)
    }

    /// Fitted `(slope, intercept)`, if any.
    pub fn coefficients(&self) -> Option<(f64, f64)> {
        self.model
    }
}

impl Predictor for LinearPredictor {
    fn predict(&self, start: u64) -> Result<f64, PredictorError> {
        let (slope, intercept) = self.model.ok_or(PredictorError::NotFitted)?;
        let estimate = slope * start as f64 + intercept;
        if estimate.is_finite() {
            Ok(estimate)
        } else {
            Err(PredictorError::NonFinite { start })
        }
    }
}

fn least_squares(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx) = (0.0f64, 0.0f64);
    for (x, y) in points {
        sxy += (x - mean_x) * (y - mean_y);
        sxx += (x - mean_x) * (x - mean_x);
    }
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    Some((slope, mean_y - slope * mean_x))
}
