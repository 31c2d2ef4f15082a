//! Error types and validation functions for trajectory analysis.
//!
//! Every estimator, fit and simulator in this crate validates its inputs eagerly
//! and reports failures through [`DiffusionError`]. Numerical problems such as
//! a division by a zero sample count surface as errors, never as NaN results.

use thiserror::Error;

/// Error types for trajectory analysis operations.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum DiffusionError {
    /// Not enough valid (non-gap) position pairs for the requested lag.
    #[error("Insufficient data for {operation} at lag {lag}: need at least {required} valid pairs, got {actual}")]
    InsufficientData {
        /// Operation that ran out of data
        operation: String,
        /// Time lag (in frames) that was requested
        lag: usize,
        /// Minimum number of valid samples required
        required: usize,
        /// Number of valid samples found
        actual: usize,
    },

    /// Structurally invalid input such as a too short trajectory or an
    /// inverted lag range.
    #[error("Invalid input: {parameter} = {value}, expected {constraint}")]
    InvalidInput {
        /// Parameter name
        parameter: String,
        /// Invalid value provided
        value: f64,
        /// Valid range or constraint description
        constraint: String,
    },

    /// The constrained optimization backend cannot be used.
    #[error("Solver unavailable: {solver} ({reason})")]
    SolverUnavailable {
        /// Name of the requested solver
        solver: String,
        /// Why it could not be used
        reason: String,
    },

    /// Numerical computation produced a non-finite or otherwise unusable value.
    #[error("Numerical computation failed: {reason}")]
    NumericalError {
        /// Detailed reason for numerical failure
        reason: String,
        /// Operation that failed
        operation: Option<String>,
    },

    /// Shared state (e.g. a shared random number generator) could not be accessed.
    #[error("Concurrent access failed: {resource}")]
    ConcurrencyError {
        /// Resource that couldn't be accessed
        resource: String,
    },
}

impl DiffusionError {
    /// True for errors caused by structurally invalid inputs.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, DiffusionError::InvalidInput { .. })
    }

    /// True for errors caused by missing valid samples.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, DiffusionError::InsufficientData { .. })
    }
}

/// Result type for trajectory analysis operations.
pub type DiffusionResult<T> = Result<T, DiffusionError>;

/// Validates that a parameter is within expected bounds (inclusive).
///
/// # Example
/// ```rust
/// use trajectory_diffusion::errors::validate_parameter;
///
/// assert!(validate_parameter(0.5, 0.0, 2.0, "alpha").is_ok());
/// assert!(validate_parameter(2.5, 0.0, 2.0, "alpha").is_err());
/// ```
pub fn validate_parameter(value: f64, min: f64, max: f64, name: &str) -> DiffusionResult<()> {
    if value.is_nan() {
        return Err(DiffusionError::InvalidInput {
            parameter: name.to_string(),
            value,
            constraint: "must not be NaN".to_string(),
        });
    }

    if min.is_nan() || max.is_nan() || min > max {
        return Err(DiffusionError::NumericalError {
            reason: format!(
                "Invalid bounds for parameter {}: min={}, max={}",
                name, min, max
            ),
            operation: None,
        });
    }

    if value < min || value > max {
        Err(DiffusionError::InvalidInput {
            parameter: name.to_string(),
            value,
            constraint: format!("[{}, {}]", min, max),
        })
    } else {
        Ok(())
    }
}

/// Validates that a value is finite and strictly positive.
///
/// Frame rates and time lags must satisfy this.
pub fn validate_positive(value: f64, name: &str) -> DiffusionResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(DiffusionError::InvalidInput {
            parameter: name.to_string(),
            value,
            constraint: "finite and > 0".to_string(),
        });
    }
    Ok(())
}

/// Validates that a value is finite and not NaN.
///
/// # Example
/// ```rust
/// use trajectory_diffusion::errors::validate_finite;
///
/// assert!(validate_finite(1.0, "test").is_ok());
/// assert!(validate_finite(f64::NAN, "test").is_err());
/// ```
pub fn validate_finite(value: f64, name: &str) -> DiffusionResult<()> {
    if !value.is_finite() {
        Err(DiffusionError::NumericalError {
            reason: format!("{} is not finite: {}", name, value),
            operation: None,
        })
    } else {
        Ok(())
    }
}

/// Validates that all values in a slice are finite.
///
/// Returns on the first offending value, reporting its index.
pub fn validate_all_finite(data: &[f64], name: &str) -> DiffusionResult<()> {
    if let Some((i, &value)) = data.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(DiffusionError::InvalidInput {
            parameter: format!("{}[{}]", name, i),
            value,
            constraint: "finite".to_string(),
        });
    }
    Ok(())
}

/// Validates a spatial dimension (1, 2 or 3).
pub fn validate_dimension(dimension: usize) -> DiffusionResult<()> {
    if !(1..=3).contains(&dimension) {
        return Err(DiffusionError::InvalidInput {
            parameter: "dimension".to_string(),
            value: dimension as f64,
            constraint: "1, 2 or 3".to_string(),
        });
    }
    Ok(())
}

/// Validates a time lag (in frames), which must be at least one.
pub fn validate_lag(lag: usize) -> DiffusionResult<()> {
    if lag == 0 {
        return Err(DiffusionError::InvalidInput {
            parameter: "lag".to_string(),
            value: 0.0,
            constraint: ">= 1".to_string(),
        });
    }
    Ok(())
}

/// Validates an inclusive lag range `[lag_min, lag_max]`.
pub fn validate_lag_range(lag_min: usize, lag_max: usize) -> DiffusionResult<()> {
    validate_lag(lag_min)?;
    if lag_min > lag_max {
        return Err(DiffusionError::InvalidInput {
            parameter: "lag_min".to_string(),
            value: lag_min as f64,
            constraint: format!("<= lag_max ({})", lag_max),
        });
    }
    Ok(())
}
