//! # Trajectory Diffusion
//!
//! Diffusion analysis of single-particle trajectories.
//!
//! This crate estimates diffusion coefficients from possibly gapped particle
//! trajectories, fits the confined-diffusion model to mean squared displacement
//! (MSD) curves, and simulates anomalous and free diffusion for validation.
//!
//! ## Key Features
//!
//! - **Gap-aware data model**: missing frames are skipped, never treated as zero
//! - **MSD evaluation**: pluggable evaluators, MSD curves and ensemble averages
//! - **Diffusion coefficient estimators**: covariance-based (robust to
//!   localization noise) and MSD regression
//! - **Confined diffusion fit**: Levenberg–Marquardt, unconstrained or with
//!   pluggable bound-constrained backends
//! - **Simulation**: Weierstrass–Mandelbrot anomalous diffusion and free
//!   diffusion, reproducible through seeded generators
//!
//! ## Quick Start
//!
//! ```rust
//! use trajectory_diffusion::{
//!     CovarianceDiffusionCoefficientEstimator, DiffusionCoefficientEstimator,
//!     FreeDiffusionSimulation, RegressionDiffusionCoefficientEstimator, Simulator,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let simulation = FreeDiffusionSimulation::new(0.5, 1.0 / 30.0, 2, 2_000)?;
//!     let trajectory = simulation.generate_with_seed(42)?;
//!
//!     let covariance = CovarianceDiffusionCoefficientEstimator::new();
//!     let regression = RegressionDiffusionCoefficientEstimator::new(1, 5)?;
//!     for estimator in [&covariance as &dyn DiffusionCoefficientEstimator, &regression] {
//!         let d = estimator.diffusion_coefficient(&trajectory, simulation.frame_rate())?;
//!         println!("{}: D = {:.3}", estimator.short_name(), d);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Cargo features
//!
//! - `bounded-solver` (default): built-in backend for the constrained fit
//! - `parallel`: rayon-parallel ensemble MSD
//! - `serde`: `Serialize`/`Deserialize` on configurations and results

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod math_utils;
pub mod rng;
pub mod trajectory;

// Analysis methods
pub mod curve_fit;
pub mod diffusion_estimators;
pub mod drift;
pub mod features;
pub mod generators;
pub mod msd;
pub mod optimization;

// Re-exports for convenience - main public API
pub use config::SolverConfig;
pub use errors::{DiffusionError, DiffusionResult};
pub use rng::{SharedRng, SimulationRng};
pub use trajectory::{Trajectory, TrajectoryBuilder, ValidIndexTimelagIterator};

// MSD exports
pub use msd::{
    ensemble_msd_curve, msd_curve, DirectionalMsd, MeanSquaredDisplacement, MsdCurve,
    MsdEvaluator, MsdSample,
};

// Estimator exports
pub use diffusion_estimators::{
    CovarianceDiffusionCoefficientEstimator, CovarianceEstimate, DiffusionCoefficientEstimator,
    RegressionDiffusionCoefficientEstimator, RegressionEstimate,
};

// Curve fit exports
pub use curve_fit::{
    ConfinedDiffusionMsdCurveFit, ConfinedFitResult, ConfinedModelParameters, ConvergenceWarning,
    FitMethod,
};
#[cfg(feature = "bounded-solver")]
pub use optimization::BoundedLeastSquaresSolver;
pub use optimization::{LeastSquaresSolver, NlpSolution, NlpSolver, NonlinearProgram};

// Data generation exports
pub use generators::{AnomalousDiffusionWmSimulation, FreeDiffusionSimulation, Simulator};

// Trajectory utilities
pub use drift::LinearDriftCorrector;
pub use features::max_distance_from_start;
