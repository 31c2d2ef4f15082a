//! Numerical helpers shared by the estimators: weighted linear regression and
//! summary statistics with explicit error reporting.

use crate::errors::{DiffusionError, DiffusionResult};
use statrs::statistics::Statistics;

/// Predictor spread below this is treated as a constant predictor.
const MIN_VARIANCE: f64 = 1e-300;

/// Result of a straight-line fit `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    /// Fitted slope
    pub slope: f64,
    /// Fitted intercept
    pub intercept: f64,
    /// Standard error of the slope (0 for an exact fit or two distinct x)
    pub slope_std_error: f64,
    /// Total weight of all observations
    pub total_weight: f64,
}

/// Weighted least squares regression with integer frequency weights.
///
/// Each observation `(x, y, w)` behaves exactly like `w` identical points,
/// so this is equivalent to an ordinary least squares fit over the expanded
/// data without materializing it. Observations with zero weight are ignored.
///
/// # Errors
/// * `InsufficientData` if fewer than two distinct predictor values carry weight.
/// * `NumericalError` for non-finite data or a non-finite fit.
///
/// # Example
/// ```rust
/// use trajectory_diffusion::math_utils::weighted_linear_regression;
///
/// let fit = weighted_linear_regression(&[(1.0, 2.0, 3), (2.0, 4.0, 1)]).unwrap();
/// assert!((fit.slope - 2.0).abs() < 1e-12);
/// ```
pub fn weighted_linear_regression(observations: &[(f64, f64, usize)]) -> DiffusionResult<LinearFit> {
    let weighted: Vec<(f64, f64, f64)> = observations
        .iter()
        .filter(|(_, _, w)| *w > 0)
        .map(|&(x, y, w)| (x, y, w as f64))
        .collect();

    if weighted
        .iter()
        .any(|(x, y, _)| !x.is_finite() || !y.is_finite())
    {
        return Err(DiffusionError::NumericalError {
            reason: "Non-finite values in regression data".to_string(),
            operation: Some("weighted_linear_regression".to_string()),
        });
    }

    let total_weight: f64 = weighted.iter().map(|(_, _, w)| w).sum();
    if weighted.is_empty() {
        return Err(DiffusionError::InsufficientData {
            operation: "weighted_linear_regression".to_string(),
            lag: 0,
            required: 2,
            actual: 0,
        });
    }

    // Center first to avoid cancellation when x is large relative to its spread.
    let mean_x = weighted.iter().map(|(x, _, w)| w * x).sum::<f64>() / total_weight;
    let mean_y = weighted.iter().map(|(_, y, w)| w * y).sum::<f64>() / total_weight;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for &(x, y, w) in &weighted {
        let dx = x - mean_x;
        sxx += w * dx * dx;
        sxy += w * dx * (y - mean_y);
    }

    if sxx <= MIN_VARIANCE {
        return Err(DiffusionError::InsufficientData {
            operation: "weighted_linear_regression".to_string(),
            lag: 0,
            required: 2,
            actual: 1,
        });
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    if !slope.is_finite() || !intercept.is_finite() {
        return Err(DiffusionError::NumericalError {
            reason: "Non-finite regression coefficients computed".to_string(),
            operation: Some("weighted_linear_regression".to_string()),
        });
    }

    let rss: f64 = weighted
        .iter()
        .map(|&(x, y, w)| {
            let r = y - (slope * x + intercept);
            w * r * r
        })
        .sum();
    let slope_std_error = if total_weight > 2.0 {
        (rss / (total_weight - 2.0) / sxx).sqrt()
    } else {
        0.0
    };

    Ok(LinearFit {
        slope,
        intercept,
        slope_std_error,
        total_weight,
    })
}

/// Arithmetic mean of `sum` over `count` samples, failing on an empty sample.
pub(crate) fn checked_mean(sum: f64, count: usize, operation: &str, lag: usize) -> DiffusionResult<f64> {
    if count == 0 {
        return Err(DiffusionError::InsufficientData {
            operation: operation.to_string(),
            lag,
            required: 1,
            actual: 0,
        });
    }
    let mean = sum / count as f64;
    if !mean.is_finite() {
        return Err(DiffusionError::NumericalError {
            reason: format!("mean of {} samples is not finite", count),
            operation: Some(operation.to_string()),
        });
    }
    Ok(mean)
}

/// Unbiased sample variance, defined as 0 for fewer than two values.
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.variance()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_weighted_regression_perfect_fit() {
        let obs = vec![(1.0, 3.0, 1), (2.0, 5.0, 4), (3.0, 7.0, 2)];
        let fit = weighted_linear_regression(&obs).unwrap();
        assert_approx_eq!(fit.slope, 2.0, 1e-12);
        assert_approx_eq!(fit.intercept, 1.0, 1e-12);
        assert_approx_eq!(fit.slope_std_error, 0.0, 1e-12);
        assert_approx_eq!(fit.total_weight, 7.0);
    }

    #[test]
    fn test_weights_match_duplicated_points() {
        let weighted = weighted_linear_regression(&[(1.0, 1.0, 3), (2.0, 3.0, 1), (4.0, 4.0, 2)])
            .unwrap();
        let duplicated = weighted_linear_regression(&[
            (1.0, 1.0, 1),
            (1.0, 1.0, 1),
            (1.0, 1.0, 1),
            (2.0, 3.0, 1),
            (4.0, 4.0, 1),
            (4.0, 4.0, 1),
        ])
        .unwrap();
        assert_approx_eq!(weighted.slope, duplicated.slope, 1e-12);
        assert_approx_eq!(weighted.intercept, duplicated.intercept, 1e-12);
        assert_approx_eq!(weighted.slope_std_error, duplicated.slope_std_error, 1e-12);
    }

    #[test]
    fn test_two_distinct_points_interpolate() {
        let fit = weighted_linear_regression(&[(0.0, 0.0, 1), (0.5, 2.0, 9)]).unwrap();
        assert_approx_eq!(fit.slope, 4.0, 1e-12);
        assert_approx_eq!(fit.intercept, 0.0, 1e-12);
    }

    #[test]
    fn test_constant_predictor_rejected() {
        let result = weighted_linear_regression(&[(1.0, 1.0, 5), (1.0, 2.0, 5)]);
        assert!(matches!(result, Err(DiffusionError::InsufficientData { .. })));
        let result = weighted_linear_regression(&[(1.0, 1.0, 0), (2.0, 2.0, 3)]);
        assert!(result.is_err());
        assert!(weighted_linear_regression(&[]).is_err());
    }

    #[test]
    fn test_non_finite_rejected() {
        let result = weighted_linear_regression(&[(1.0, f64::NAN, 1), (2.0, 2.0, 1)]);
        assert!(matches!(result, Err(DiffusionError::NumericalError { .. })));
    }

    #[test]
    fn test_checked_mean() {
        assert_approx_eq!(checked_mean(6.0, 3, "test", 1).unwrap(), 2.0);
        assert!(checked_mean(1.0, 0, "test", 1).unwrap_err().is_insufficient_data());
    }

    #[test]
    fn test_sample_variance() {
        assert_approx_eq!(sample_variance(&[1.0, 2.0, 3.0, 4.0]), 5.0 / 3.0, 1e-12);
        assert_eq!(sample_variance(&[2.0]), 0.0);
        assert_eq!(sample_variance(&[]), 0.0);
    }
}
