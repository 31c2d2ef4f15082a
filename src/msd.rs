//! Mean squared displacement (MSD) evaluation.
//!
//! The [`MsdEvaluator`] trait is the extension point used by the regression
//! estimator: any formula that maps `(trajectory, lag)` to an [`MsdSample`] can
//! be plugged in. [`MeanSquaredDisplacement`] sums over all configured axes,
//! [`DirectionalMsd`] restricts to a single axis.
//!
//! [`msd_curve`] and [`ensemble_msd_curve`] tabulate MSD over a lag range, which
//! is the input to the confined-diffusion fit and to external plotting.

use crate::curve_fit::ConfinedModelParameters;
use crate::errors::{validate_lag_range, validate_positive, DiffusionError, DiffusionResult};
use crate::math_utils::sample_variance;
use crate::trajectory::Trajectory;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// MSD at a single lag.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MsdSample {
    /// Mean of the squared displacements
    pub msd: f64,
    /// Sample variance of the squared displacements
    pub variance: f64,
    /// Number of valid start indices used
    pub sample_count: usize,
}

/// Capability "evaluate MSD for a trajectory at a lag".
pub trait MsdEvaluator: Send + Sync {
    /// Compute the MSD sample at `lag` (in frames).
    ///
    /// # Errors
    /// * `InvalidInput` for `lag == 0`.
    /// * `InsufficientData` if no valid index pair exists at `lag`.
    fn evaluate(&self, trajectory: &Trajectory, lag: usize) -> DiffusionResult<MsdSample>;

    /// Human readable name of the MSD flavor.
    fn name(&self) -> &'static str;
}

/// Standard MSD summed over axes `0..dimension`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanSquaredDisplacement;

impl MeanSquaredDisplacement {
    /// Create the standard evaluator.
    pub fn new() -> Self {
        Self
    }
}

impl MsdEvaluator for MeanSquaredDisplacement {
    fn evaluate(&self, trajectory: &Trajectory, lag: usize) -> DiffusionResult<MsdSample> {
        let dimension = trajectory.dimension();
        squared_displacement_sample(trajectory, lag, "mean squared displacement", |d| {
            d.iter().take(dimension).map(|c| c * c).sum()
        })
    }

    fn name(&self) -> &'static str {
        "Mean squared displacement"
    }
}

/// MSD restricted to one axis (0 = x, 1 = y, 2 = z).
#[derive(Debug, Clone, Copy)]
pub struct DirectionalMsd {
    axis: usize,
}

impl DirectionalMsd {
    /// # Errors
    /// * `InvalidInput` if `axis > 2`.
    pub fn new(axis: usize) -> DiffusionResult<Self> {
        if axis > 2 {
            return Err(DiffusionError::InvalidInput {
                parameter: "axis".to_string(),
                value: axis as f64,
                constraint: "0, 1 or 2".to_string(),
            });
        }
        Ok(Self { axis })
    }

    /// Axis this evaluator measures along.
    pub fn axis(&self) -> usize {
        self.axis
    }
}

impl MsdEvaluator for DirectionalMsd {
    fn evaluate(&self, trajectory: &Trajectory, lag: usize) -> DiffusionResult<MsdSample> {
        if self.axis >= trajectory.dimension() {
            return Err(DiffusionError::InvalidInput {
                parameter: "axis".to_string(),
                value: self.axis as f64,
                constraint: format!("< trajectory dimension ({})", trajectory.dimension()),
            });
        }
        let axis = self.axis;
        squared_displacement_sample(trajectory, lag, "directional squared displacement", |d| {
            d[axis] * d[axis]
        })
    }

    fn name(&self) -> &'static str {
        "Directional mean squared displacement"
    }
}

fn squared_displacement_sample<F>(
    trajectory: &Trajectory,
    lag: usize,
    operation: &str,
    squared_norm: F,
) -> DiffusionResult<MsdSample>
where
    F: Fn(&nalgebra::Vector3<f64>) -> f64,
{
    let mut squares = Vec::new();
    for i in trajectory.valid_indices(lag)? {
        if let (Some(a), Some(b)) = (trajectory.get(i), trajectory.get(i + lag)) {
            squares.push(squared_norm(&(b - a)));
        }
    }

    if squares.is_empty() {
        return Err(DiffusionError::InsufficientData {
            operation: operation.to_string(),
            lag,
            required: 1,
            actual: 0,
        });
    }

    let sample_count = squares.len();
    let msd = squares.iter().sum::<f64>() / sample_count as f64;
    Ok(MsdSample {
        msd,
        variance: sample_variance(&squares),
        sample_count,
    })
}

/// MSD tabulated over a range of lags.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MsdCurve {
    /// Lags (in frames) that had at least one valid sample
    pub lags: Vec<usize>,
    /// Lag times `lag / frame_rate`
    pub times: Vec<f64>,
    /// MSD values
    pub msd: Vec<f64>,
    /// Variance of the squared displacements per lag
    pub variance: Vec<f64>,
    /// Valid sample counts per lag
    pub sample_counts: Vec<usize>,
}

impl MsdCurve {
    /// Number of tabulated lags.
    pub fn len(&self) -> usize {
        self.lags.len()
    }

    /// True if no lag had data.
    pub fn is_empty(&self) -> bool {
        self.lags.is_empty()
    }

    fn push(&mut self, lag: usize, frame_rate: f64, sample: MsdSample) {
        self.lags.push(lag);
        self.times.push(lag as f64 / frame_rate);
        self.msd.push(sample.msd);
        self.variance.push(sample.variance);
        self.sample_counts.push(sample.sample_count);
    }

    /// Confined-model values at this curve's lag times, for overlaying a fit.
    pub fn model_curve(&self, parameters: &ConfinedModelParameters) -> Vec<f64> {
        parameters.model_curve(&self.times)
    }
}

/// Tabulate MSD for every lag in `[lag_min, lag_max]`.
///
/// Lags without a valid sample are left out of the curve, and lags past the
/// end of the trajectory are never evaluated.
///
/// # Errors
/// * `InvalidInput` for a bad lag range or frame rate.
/// * `InsufficientData` if no lag in the range has a valid sample.
pub fn msd_curve(
    trajectory: &Trajectory,
    evaluator: &dyn MsdEvaluator,
    lag_min: usize,
    lag_max: usize,
    frame_rate: f64,
) -> DiffusionResult<MsdCurve> {
    validate_lag_range(lag_min, lag_max)?;
    validate_positive(frame_rate, "frame_rate")?;

    let mut curve = MsdCurve::default();
    for lag in lag_min..=lag_max.min(trajectory.len().saturating_sub(1)) {
        match evaluator.evaluate(trajectory, lag) {
            Ok(sample) => curve.push(lag, frame_rate, sample),
            Err(DiffusionError::InsufficientData { .. }) => {
                log::debug!("{}: no valid pairs at lag {}, skipped", evaluator.name(), lag);
            }
            Err(e) => return Err(e),
        }
    }

    if curve.is_empty() {
        return Err(DiffusionError::InsufficientData {
            operation: "msd_curve".to_string(),
            lag: lag_min,
            required: 1,
            actual: 0,
        });
    }
    Ok(curve)
}

/// Average MSD over many trajectories for every lag in `[lag_min, lag_max]`.
///
/// Each trajectory contributes its own MSD with equal weight; trajectories
/// without samples at a lag are left out for that lag. Variance is the
/// spread of the per-trajectory MSD values and counts are summed. Lags past
/// the end of the longest trajectory are never evaluated.
///
/// Runs in parallel across trajectories with the `parallel` feature.
pub fn ensemble_msd_curve(
    trajectories: &[Trajectory],
    evaluator: &dyn MsdEvaluator,
    lag_min: usize,
    lag_max: usize,
    frame_rate: f64,
) -> DiffusionResult<MsdCurve> {
    validate_lag_range(lag_min, lag_max)?;
    validate_positive(frame_rate, "frame_rate")?;

    let longest = trajectories.iter().map(Trajectory::len).max().unwrap_or(0);
    let mut curve = MsdCurve::default();
    for lag in lag_min..=lag_max.min(longest.saturating_sub(1)) {
        let samples = ensemble_samples(trajectories, evaluator, lag)?;
        if samples.is_empty() {
            log::debug!("ensemble: no trajectory has pairs at lag {}, skipped", lag);
            continue;
        }
        let values: Vec<f64> = samples.iter().map(|s| s.msd).collect();
        let msd = values.iter().sum::<f64>() / values.len() as f64;
        curve.push(
            lag,
            frame_rate,
            MsdSample {
                msd,
                variance: sample_variance(&values),
                sample_count: samples.iter().map(|s| s.sample_count).sum(),
            },
        );
    }

    if curve.is_empty() {
        return Err(DiffusionError::InsufficientData {
            operation: "ensemble_msd_curve".to_string(),
            lag: lag_min,
            required: 1,
            actual: 0,
        });
    }
    Ok(curve)
}

fn keep_available(result: DiffusionResult<MsdSample>) -> DiffusionResult<Option<MsdSample>> {
    match result {
        Ok(sample) => Ok(Some(sample)),
        Err(DiffusionError::InsufficientData { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(feature = "parallel")]
fn ensemble_samples(
    trajectories: &[Trajectory],
    evaluator: &dyn MsdEvaluator,
    lag: usize,
) -> DiffusionResult<Vec<MsdSample>> {
    let samples: DiffusionResult<Vec<Option<MsdSample>>> = trajectories
        .par_iter()
        .map(|t| keep_available(evaluator.evaluate(t, lag)))
        .collect();
    Ok(samples?.into_iter().flatten().collect())
}

#[cfg(not(feature = "parallel"))]
fn ensemble_samples(
    trajectories: &[Trajectory],
    evaluator: &dyn MsdEvaluator,
    lag: usize,
) -> DiffusionResult<Vec<MsdSample>> {
    let samples: DiffusionResult<Vec<Option<MsdSample>>> = trajectories
        .iter()
        .map(|t| keep_available(evaluator.evaluate(t, lag)))
        .collect();
    Ok(samples?.into_iter().flatten().collect())
}
