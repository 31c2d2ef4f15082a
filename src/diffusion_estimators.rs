//! Diffusion coefficient estimators for single-particle trajectories.
//!
//! - **Covariance estimator**: closed form from one-step displacement variance
//!   and the covariance of consecutive displacements, which cancels the
//!   contribution of static localization noise (Vestergaard, Blainey &
//!   Flyvbjerg, Phys. Rev. E 89, 022726, 2014).
//! - **Regression estimator**: straight-line fit of MSD against lag time,
//!   `D = slope / (2 · dimension)`.
//!
//! Both implement [`DiffusionCoefficientEstimator`] so callers can swap them.

use crate::errors::{validate_lag_range, validate_positive, DiffusionError, DiffusionResult};
use crate::math_utils::{checked_mean, weighted_linear_regression};
use crate::msd::{MeanSquaredDisplacement, MsdEvaluator};
use crate::trajectory::Trajectory;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Common interface of all diffusion coefficient estimators.
pub trait DiffusionCoefficientEstimator {
    /// Estimate the diffusion coefficient of `trajectory` sampled at `frame_rate`
    /// frames per unit time.
    fn diffusion_coefficient(&self, trajectory: &Trajectory, frame_rate: f64) -> DiffusionResult<f64>;

    /// Descriptive name.
    fn name(&self) -> &'static str;

    /// Abbreviation used in tables.
    fn short_name(&self) -> &'static str;
}

// ============================================================================
// COVARIANCE ESTIMATOR
// ============================================================================

/// Output of [`CovarianceDiffusionCoefficientEstimator::estimate`].
///
/// Per-axis arrays are indexed x, y, z and always hold three entries; only the
/// first `dimension` axes enter `diffusion_coefficient`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CovarianceEstimate {
    /// Diffusion coefficient averaged over the trajectory's axes
    pub diffusion_coefficient: f64,
    /// Per-axis diffusion coefficients `frame_rate * (msd / 2 + cov)`
    pub axis_diffusion: [f64; 3],
    /// Per-axis mean squared one-step displacement
    pub msd: [f64; 3],
    /// Per-axis mean product of consecutive one-step displacements
    pub cov: [f64; 3],
    /// Per-axis localization noise term `R * msd + (2R - 1) + cov`
    pub localization_noise: [f64; 3],
    /// Number of one-step displacements used
    pub displacement_count: usize,
    /// Number of consecutive displacement pairs used
    pub pair_count: usize,
}

/// Covariance-based estimator that corrects for localization noise.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CovarianceDiffusionCoefficientEstimator {
    localization_noise: f64,
}

impl CovarianceDiffusionCoefficientEstimator {
    /// Estimator with localization-noise parameter `R = 0`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the localization-noise parameter `R` (a known constant of the
    /// acquisition protocol).
    pub fn with_localization_noise(mut self, r: f64) -> Self {
        self.localization_noise = r;
        self
    }

    /// Localization-noise parameter `R`.
    pub fn localization_noise(&self) -> f64 {
        self.localization_noise
    }

    /// Full covariance estimate.
    ///
    /// # Errors
    /// * `InvalidInput` for a single-position trajectory, a non-positive frame
    ///   rate or a non-finite `R`.
    /// * `InsufficientData` if no valid one-step displacement or no valid pair
    ///   of consecutive displacements exists.
    pub fn estimate(&self, trajectory: &Trajectory, frame_rate: f64) -> DiffusionResult<CovarianceEstimate> {
        trajectory.require_len(2)?;
        validate_positive(frame_rate, "frame_rate")?;
        let r = self.localization_noise;
        if !r.is_finite() {
            return Err(DiffusionError::InvalidInput {
                parameter: "localization_noise".to_string(),
                value: r,
                constraint: "finite".to_string(),
            });
        }

        let mut sum_sq = [0.0; 3];
        let mut sum_cov = [0.0; 3];
        let mut n = 0usize;
        let mut m = 0usize;

        for i in trajectory.valid_indices(1)? {
            let (Some(p0), Some(p1)) = (trajectory.get(i), trajectory.get(i + 1)) else {
                continue;
            };
            let step = p1 - p0;
            for axis in 0..3 {
                sum_sq[axis] += step[axis] * step[axis];
            }
            n += 1;

            if let Some(p2) = trajectory.get(i + 2) {
                let next = p2 - p1;
                for axis in 0..3 {
                    sum_cov[axis] += step[axis] * next[axis];
                }
                m += 1;
            }
        }

        let mut msd = [0.0; 3];
        let mut cov = [0.0; 3];
        for axis in 0..3 {
            msd[axis] = checked_mean(sum_sq[axis], n, "covariance estimator (msd)", 1)?;
            cov[axis] = checked_mean(sum_cov[axis], m, "covariance estimator (cov)", 2)?;
        }

        let axis_diffusion = [0, 1, 2].map(|axis| frame_rate * (msd[axis] / 2.0 + cov[axis]));
        let localization_noise = [0, 1, 2].map(|axis| r * msd[axis] + (2.0 * r - 1.0) + cov[axis]);

        let dimension = trajectory.dimension();
        let diffusion_coefficient =
            axis_diffusion.iter().take(dimension).sum::<f64>() / dimension as f64;

        log::debug!(
            "covariance estimator: N={}, M={}, D={:.6e}",
            n,
            m,
            diffusion_coefficient
        );

        Ok(CovarianceEstimate {
            diffusion_coefficient,
            axis_diffusion,
            msd,
            cov,
            localization_noise,
            displacement_count: n,
            pair_count: m,
        })
    }
}

impl DiffusionCoefficientEstimator for CovarianceDiffusionCoefficientEstimator {
    fn diffusion_coefficient(&self, trajectory: &Trajectory, frame_rate: f64) -> DiffusionResult<f64> {
        Ok(self.estimate(trajectory, frame_rate)?.diffusion_coefficient)
    }

    fn name(&self) -> &'static str {
        "Diffusion coefficient (Covariance)"
    }

    fn short_name(&self) -> &'static str {
        "DC-COV"
    }
}

// ============================================================================
// REGRESSION ESTIMATOR
// ============================================================================

/// Output of [`RegressionDiffusionCoefficientEstimator::estimate`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegressionEstimate {
    /// `slope / (2 * dimension)`
    pub diffusion_coefficient: f64,
    /// Slope of MSD against lag time
    pub slope: f64,
    /// Intercept of MSD against lag time
    pub intercept: f64,
    /// Standard error of the slope
    pub slope_std_error: f64,
}

/// Estimator fitting a line to MSD against lag time over `[lag_min, lag_max]`.
///
/// Each lag enters the fit as `N` identical points, `N` being the number of
/// valid samples at that lag. When `lag_min == lag_max` an anchor point at the
/// origin is added so the single lag still determines a line through `(0, 0)`.
pub struct RegressionDiffusionCoefficientEstimator {
    lag_min: usize,
    lag_max: usize,
    evaluator: Box<dyn MsdEvaluator>,
}

impl std::fmt::Debug for RegressionDiffusionCoefficientEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegressionDiffusionCoefficientEstimator")
            .field("lag_min", &self.lag_min)
            .field("lag_max", &self.lag_max)
            .field("evaluator", &self.evaluator.name())
            .finish()
    }
}

impl RegressionDiffusionCoefficientEstimator {
    /// # Errors
    /// * `InvalidInput` if `lag_min == 0` or `lag_min > lag_max`.
    pub fn new(lag_min: usize, lag_max: usize) -> DiffusionResult<Self> {
        validate_lag_range(lag_min, lag_max)?;
        Ok(Self {
            lag_min,
            lag_max,
            evaluator: Box::new(MeanSquaredDisplacement),
        })
    }

    /// Replace the MSD formula used for each lag.
    pub fn with_msd_evaluator(mut self, evaluator: Box<dyn MsdEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Change the lag range.
    pub fn set_timelags(&mut self, lag_min: usize, lag_max: usize) -> DiffusionResult<()> {
        validate_lag_range(lag_min, lag_max)?;
        self.lag_min = lag_min;
        self.lag_max = lag_max;
        Ok(())
    }

    /// Current lag range `(lag_min, lag_max)`.
    pub fn timelags(&self) -> (usize, usize) {
        (self.lag_min, self.lag_max)
    }

    /// Regression estimate.
    ///
    /// Lags past the end of the trajectory are not evaluated, so `lag_max` may
    /// exceed the trajectory length.
    ///
    /// # Errors
    /// * `InvalidInput` for a single-position trajectory or bad frame rate.
    /// * `InsufficientData` if no lag in the range has valid samples.
    pub fn estimate(&self, trajectory: &Trajectory, frame_rate: f64) -> DiffusionResult<RegressionEstimate> {
        trajectory.require_len(2)?;
        validate_positive(frame_rate, "frame_rate")?;

        let mut observations = Vec::new();
        if self.lag_min == self.lag_max {
            observations.push((0.0, 0.0, 1));
        }

        // No lag beyond len - 1 can have a pair.
        let lag_max = self.lag_max.min(trajectory.len() - 1);
        let mut samples_used = 0;
        for lag in self.lag_min..=lag_max {
            match self.evaluator.evaluate(trajectory, lag) {
                Ok(sample) => {
                    observations.push((lag as f64 / frame_rate, sample.msd, sample.sample_count));
                    samples_used += sample.sample_count;
                }
                Err(DiffusionError::InsufficientData { .. }) => {
                    log::debug!("regression estimator: lag {} has no valid pairs", lag);
                }
                Err(e) => return Err(e),
            }
        }

        if samples_used == 0 {
            return Err(DiffusionError::InsufficientData {
                operation: "regression estimator".to_string(),
                lag: self.lag_min,
                required: 1,
                actual: 0,
            });
        }

        let fit = weighted_linear_regression(&observations)?;
        Ok(RegressionEstimate {
            diffusion_coefficient: fit.slope / (2.0 * trajectory.dimension() as f64),
            slope: fit.slope,
            intercept: fit.intercept,
            slope_std_error: fit.slope_std_error,
        })
    }
}

impl DiffusionCoefficientEstimator for RegressionDiffusionCoefficientEstimator {
    fn diffusion_coefficient(&self, trajectory: &Trajectory, frame_rate: f64) -> DiffusionResult<f64> {
        Ok(self.estimate(trajectory, frame_rate)?.diffusion_coefficient)
    }

    fn name(&self) -> &'static str {
        "Diffusion coefficient (Regression)"
    }

    fn short_name(&self) -> &'static str {
        "DC-REG"
    }
}
