//! # Solver Configuration
//!
//! This module contains configuration structures controlling the
//! Levenberg–Marquardt least-squares solver used by the confined-diffusion
//! curve fit.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::{validate_parameter, validate_positive, DiffusionError, DiffusionResult};

/// Configuration for the least-squares solvers.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverConfig {
    /// Maximum number of residual evaluations per solve
    pub max_iterations: usize,
    /// Relative reduction of the sum of squares treated as converged
    pub ftol: f64,
    /// Relative change of the parameters treated as converged
    pub xtol: f64,
    /// Orthogonality between residuals and Jacobian columns treated as
    /// converged (0 disables the test)
    pub gtol: f64,
    /// Factor for the initial step bound
    pub stepbound: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl SolverConfig {
    /// Fast configuration: few evaluations, loose tolerance
    pub fn fast() -> Self {
        Self {
            max_iterations: 1_000,
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 0.0,
            stepbound: 100.0,
        }
    }

    /// Standard configuration (default)
    pub fn standard() -> Self {
        Self {
            max_iterations: 10_000,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 0.0,
            stepbound: 100.0,
        }
    }

    /// Precise configuration: tight tolerance, more evaluations
    pub fn precise() -> Self {
        Self {
            max_iterations: 50_000,
            ftol: 1e-14,
            xtol: 1e-14,
            gtol: 0.0,
            stepbound: 100.0,
        }
    }

    /// Override the evaluation limit.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Check that all settings are usable.
    pub fn validate(&self) -> DiffusionResult<()> {
        if self.max_iterations == 0 {
            return Err(DiffusionError::InvalidInput {
                parameter: "max_iterations".to_string(),
                value: 0.0,
                constraint: ">= 1".to_string(),
            });
        }
        validate_positive(self.ftol, "ftol")?;
        validate_positive(self.xtol, "xtol")?;
        validate_parameter(self.gtol, 0.0, f64::MAX, "gtol")?;
        validate_positive(self.stepbound, "stepbound")
    }
}
