//! Synthetic trajectory generators for testing and validation.
//!
//! ## Available Generators
//!
//! - **Anomalous diffusion (Weierstrass–Mandelbrot)**: increments taken from a
//!   randomized Weierstrass–Mandelbrot function with anomalous exponent `alpha`
//! - **Free diffusion**: Gaussian increments with variance `2·D·Δt` per axis,
//!   with a known diffusion coefficient for validating the estimators
//!
//! Every generator draws its randomness from a caller-supplied `RngCore`, so a
//! seeded [`SimulationRng`](crate::rng::SimulationRng) reproduces a run exactly.

use crate::errors::{
    validate_dimension, validate_parameter, validate_positive, DiffusionError, DiffusionResult,
};
use crate::rng::{SharedRng, SimulationRng};
use crate::trajectory::{Trajectory, TrajectoryBuilder};
use nalgebra::Vector3;
use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal};
use std::f64::consts::{PI, TAU};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lowest frequency index of the Weierstrass–Mandelbrot sum.
const WM_MIN_INDEX: i32 = -8;
/// Highest frequency index of the Weierstrass–Mandelbrot sum.
const WM_MAX_INDEX: i32 = 48;
/// Number of random phases per axis.
pub const WM_PHASE_COUNT: usize = (WM_MAX_INDEX - WM_MIN_INDEX + 1) as usize;

/// Source of synthetic trajectories.
pub trait Simulator {
    /// Generate one trajectory using `rng`.
    fn generate_trajectory(&self, rng: &mut dyn RngCore) -> DiffusionResult<Trajectory>;

    /// Generate one trajectory from a fresh generator seeded with `seed`.
    fn generate_with_seed(&self, seed: u64) -> DiffusionResult<Trajectory> {
        self.generate_trajectory(&mut SimulationRng::with_seed(seed))
    }

    /// Generate one trajectory while holding the shared generator.
    fn generate_shared(&self, rng: &SharedRng) -> DiffusionResult<Trajectory> {
        rng.with_rng(|rng| self.generate_trajectory(rng))?
    }
}

fn validate_simulation(
    diffusion_coefficient: f64,
    timelag: f64,
    dimension: usize,
    number_of_steps: usize,
) -> DiffusionResult<()> {
    validate_parameter(diffusion_coefficient, 0.0, f64::MAX, "diffusion_coefficient")?;
    validate_positive(timelag, "timelag")?;
    validate_dimension(dimension)?;
    if number_of_steps == 0 {
        return Err(DiffusionError::InvalidInput {
            parameter: "number_of_steps".to_string(),
            value: 0.0,
            constraint: ">= 1".to_string(),
        });
    }
    Ok(())
}

/// Integrate per-axis increments into a trajectory starting at the origin.
fn integrate(dimension: usize, increments: &[Vec<f64>], number_of_steps: usize) -> DiffusionResult<Trajectory> {
    let mut builder = TrajectoryBuilder::with_capacity(dimension, number_of_steps + 1);
    let mut position = Vector3::<f64>::zeros();
    builder.push(position.into());
    for step in 0..number_of_steps {
        for (axis, axis_increments) in increments.iter().enumerate() {
            position[axis] += axis_increments[step];
        }
        builder.push(position.into());
    }
    builder.build()
}

// ============================================================================
// ANOMALOUS DIFFUSION (WEIERSTRASS–MANDELBROT)
// ============================================================================

/// Anomalous diffusion with Weierstrass–Mandelbrot increments.
///
/// For each generated axis, phases `φ_n ~ U[0, 2π)` are drawn once for
/// `n ∈ [−8, 48]` and the process is
/// `W(t) = Σ_n (cos φ_n − cos(γⁿ·t* + φ_n)) / γ^(n·H)` with `γ = √π`,
/// `H = α/2` and `t* = 2π·t / number_of_steps`. The increment at step `t` is
/// `W(t) − W(t−1)` with `W(0) = 0`.
///
/// The x axis is always generated, the y axis for dimension ≥ 2; z stays at 0.
/// `diffusion_coefficient` and `timelag` are carried as metadata and do not
/// rescale the increments.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "WmSimulationData"))]
pub struct AnomalousDiffusionWmSimulation {
    diffusion_coefficient: f64,
    timelag: f64,
    dimension: usize,
    number_of_steps: usize,
    alpha: f64,
}

#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct WmSimulationData {
    diffusion_coefficient: f64,
    timelag: f64,
    dimension: usize,
    number_of_steps: usize,
    alpha: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<WmSimulationData> for AnomalousDiffusionWmSimulation {
    type Error = DiffusionError;

    fn try_from(data: WmSimulationData) -> DiffusionResult<Self> {
        Self::new(
            data.diffusion_coefficient,
            data.timelag,
            data.dimension,
            data.number_of_steps,
            data.alpha,
        )
    }
}

impl AnomalousDiffusionWmSimulation {
    /// # Errors
    /// * `InvalidInput` unless `diffusion_coefficient >= 0`, `timelag > 0`,
    ///   `dimension ∈ {1, 2, 3}`, `number_of_steps >= 1` and `0 < alpha <= 2`.
    pub fn new(
        diffusion_coefficient: f64,
        timelag: f64,
        dimension: usize,
        number_of_steps: usize,
        alpha: f64,
    ) -> DiffusionResult<Self> {
        validate_simulation(diffusion_coefficient, timelag, dimension, number_of_steps)?;
        validate_positive(alpha, "alpha")?;
        validate_parameter(alpha, 0.0, 2.0, "alpha")?;
        Ok(Self {
            diffusion_coefficient,
            timelag,
            dimension,
            number_of_steps,
            alpha,
        })
    }

    /// Nominal diffusion coefficient.
    pub fn diffusion_coefficient(&self) -> f64 {
        self.diffusion_coefficient
    }

    /// Time between frames.
    pub fn timelag(&self) -> f64 {
        self.timelag
    }

    /// Spatial dimension of generated trajectories.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Steps per trajectory.
    pub fn number_of_steps(&self) -> usize {
        self.number_of_steps
    }

    /// Anomalous diffusion exponent.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Increments for one axis: draws [`WM_PHASE_COUNT`] phases from `rng` and
    /// returns `number_of_steps` values.
    pub fn generate_increments<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let phases: Vec<f64> = (0..WM_PHASE_COUNT).map(|_| rng.gen::<f64>() * TAU).collect();
        let n_steps = self.number_of_steps as f64;

        let mut previous = 0.0;
        (1..=self.number_of_steps)
            .map(|t| {
                let t_star = TAU * t as f64 / n_steps;
                let w = weierstrass_mandelbrot(&phases, t_star, self.alpha / 2.0);
                let increment = w - previous;
                previous = w;
                increment
            })
            .collect()
    }
}

fn weierstrass_mandelbrot(phases: &[f64], t_star: f64, hurst: f64) -> f64 {
    let gamma = PI.sqrt();
    (WM_MIN_INDEX..=WM_MAX_INDEX)
        .zip(phases)
        .map(|(n, &phase)| {
            let n = n as f64;
            (phase.cos() - (gamma.powf(n) * t_star + phase).cos()) / gamma.powf(n * hurst)
        })
        .sum()
}

impl Simulator for AnomalousDiffusionWmSimulation {
    fn generate_trajectory(&self, rng: &mut dyn RngCore) -> DiffusionResult<Trajectory> {
        let axes = self.dimension.min(2);
        let increments: Vec<Vec<f64>> = (0..axes).map(|_| self.generate_increments(&mut *rng)).collect();
        integrate(self.dimension, &increments, self.number_of_steps)
    }
}

// ============================================================================
// FREE DIFFUSION
// ============================================================================

/// Brownian motion with diffusion coefficient `D`: independent increments
/// `N(0, 2·D·Δt)` on every axis below `dimension`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "FreeSimulationData"))]
pub struct FreeDiffusionSimulation {
    diffusion_coefficient: f64,
    timelag: f64,
    dimension: usize,
    number_of_steps: usize,
}

#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct FreeSimulationData {
    diffusion_coefficient: f64,
    timelag: f64,
    dimension: usize,
    number_of_steps: usize,
}

#[cfg(feature = "serde")]
impl TryFrom<FreeSimulationData> for FreeDiffusionSimulation {
    type Error = DiffusionError;

    fn try_from(data: FreeSimulationData) -> DiffusionResult<Self> {
        Self::new(
            data.diffusion_coefficient,
            data.timelag,
            data.dimension,
            data.number_of_steps,
        )
    }
}

impl FreeDiffusionSimulation {
    /// # Errors
    /// * `InvalidInput` unless `diffusion_coefficient >= 0`, `timelag > 0`,
    ///   `dimension ∈ {1, 2, 3}` and `number_of_steps >= 1`.
    pub fn new(
        diffusion_coefficient: f64,
        timelag: f64,
        dimension: usize,
        number_of_steps: usize,
    ) -> DiffusionResult<Self> {
        validate_simulation(diffusion_coefficient, timelag, dimension, number_of_steps)?;
        Ok(Self {
            diffusion_coefficient,
            timelag,
            dimension,
            number_of_steps,
        })
    }

    /// Diffusion coefficient of the simulated motion.
    pub fn diffusion_coefficient(&self) -> f64 {
        self.diffusion_coefficient
    }

    /// Time between frames.
    pub fn timelag(&self) -> f64 {
        self.timelag
    }

    /// Frame rate matching the simulated time lag.
    pub fn frame_rate(&self) -> f64 {
        1.0 / self.timelag
    }
}

impl Simulator for FreeDiffusionSimulation {
    fn generate_trajectory(&self, rng: &mut dyn RngCore) -> DiffusionResult<Trajectory> {
        let std_dev = (2.0 * self.diffusion_coefficient * self.timelag).sqrt();
        let normal = Normal::new(0.0, std_dev).map_err(|e| DiffusionError::NumericalError {
            reason: format!("step distribution: {}", e),
            operation: Some("free diffusion simulation".to_string()),
        })?;
        let increments: Vec<Vec<f64>> = (0..self.dimension)
            .map(|_| (0..self.number_of_steps).map(|_| normal.sample(&mut *rng)).collect())
            .collect();
        integrate(self.dimension, &increments, self.number_of_steps)
    }
}
