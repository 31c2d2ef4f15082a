//! Confined-diffusion MSD curve fit.
//!
//! Fits `y = a·(1 − b·exp((−4D)·(x/a)·c))` to an MSD curve, where `a` relates
//! to the corral size, `b` and `c` depend on the confinement geometry and `D`
//! is the diffusion coefficient. All four parameters are non-negative.
//!
//! Two strategies are available through [`FitMethod`]:
//! - [`FitMethod::Simplex`]: unconstrained Levenberg–Marquardt on
//!   `|a'|, |b'|, |c'|, |D'|`.
//! - [`FitMethod::Constrained`]: the same residuals posed as a
//!   [`NonlinearProgram`] with `a, b, c, D ≥ 0` and handed to an [`NlpSolver`].
//!
//! Only `a`, `b` and the product `c·D` are determined by the data; `c` and `D`
//! individually trade off against each other.

use crate::config::SolverConfig;
use crate::errors::{validate_all_finite, DiffusionError, DiffusionResult};
use crate::msd::MsdCurve;
use crate::optimization::{default_nlp_solver, LeastSquaresSolver, NlpSolver, NonlinearProgram};
use nalgebra::DMatrix;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of model parameters.
const PARAMETER_COUNT: usize = 4;

/// Parameters of the confined-diffusion MSD model.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConfinedModelParameters {
    /// Plateau level (corral size term)
    pub a: f64,
    /// Shape factor in front of the exponential
    pub b: f64,
    /// Shape factor in the exponent
    pub c: f64,
    /// Diffusion coefficient
    pub d: f64,
}

impl ConfinedModelParameters {
    /// Parameters `(a, b, c, D)`.
    pub fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self { a, b, c, d }
    }

    /// Parameters from `[a, b, c, D]`.
    pub fn from_array(p: [f64; 4]) -> Self {
        Self::new(p[0], p[1], p[2], p[3])
    }

    /// `[a, b, c, D]`.
    pub fn to_array(&self) -> [f64; 4] {
        [self.a, self.b, self.c, self.d]
    }

    /// Model value at lag time `x`. For `a == 0` this is the limit `0`.
    pub fn evaluate(&self, x: f64) -> f64 {
        confined_model(x, &self.to_array())
    }

    /// Model values at every lag time in `xs`.
    pub fn model_curve(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.evaluate(x)).collect()
    }
}

fn confined_model(x: f64, p: &[f64; 4]) -> f64 {
    let [a, b, c, d] = *p;
    if a == 0.0 {
        return 0.0;
    }
    a * (1.0 - b * ((-4.0 * d) * (x / a) * c).exp())
}

/// Partial derivatives of the model with respect to `a, b, c, D`.
fn confined_model_gradient(x: f64, p: &[f64; 4]) -> [f64; 4] {
    let [a, b, c, d] = *p;
    if a == 0.0 {
        return [1.0, 0.0, 0.0, 0.0];
    }
    let rate = 4.0 * c * d * x / a;
    let e = (-rate).exp();
    [1.0 - b * e - b * e * rate, -a * e, 4.0 * b * d * x * e, 4.0 * b * c * x * e]
}

/// Residuals `y - model(x)` for parameters `p`.
fn model_residuals(x: &[f64], y: &[f64], p: &[f64; 4]) -> Vec<f64> {
    x.iter().zip(y).map(|(&xi, &yi)| yi - confined_model(xi, p)).collect()
}

/// Jacobian of [`model_residuals`], scaled per column by `chain`.
fn model_residual_jacobian(x: &[f64], p: &[f64; 4], chain: [f64; 4]) -> DMatrix<f64> {
    DMatrix::from_fn(x.len(), PARAMETER_COUNT, |i, k| {
        -confined_model_gradient(x[i], p)[k] * chain[k]
    })
}

fn magnitudes(p: &[f64]) -> [f64; 4] {
    [p[0].abs(), p[1].abs(), p[2].abs(), p[3].abs()]
}

fn as_parameters(p: &[f64]) -> [f64; 4] {
    [p[0], p[1], p[2], p[3]]
}

/// Numerical strategy for the fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FitMethod {
    /// Unconstrained Levenberg–Marquardt on magnitudes of the parameters
    Simplex,
    /// Explicit `>= 0` constraints solved by an [`NlpSolver`] backend
    Constrained,
}

/// Non-fatal notice that the solver did not certify its result.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConvergenceWarning {
    /// Solver that produced the result
    pub solver: String,
    /// Iterations used
    pub iterations: usize,
    /// Objective value at the returned parameters
    pub objective_value: f64,
}

impl std::fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} stopped without certifying optimality after {} iterations (objective {:.3e})",
            self.solver, self.iterations, self.objective_value
        )
    }
}

/// Fitted parameters plus solver diagnostics.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConfinedFitResult {
    /// Fitted non-negative parameters
    pub parameters: ConfinedModelParameters,
    /// Strategy that produced them
    pub method: FitMethod,
    /// Residual sum of squares
    pub objective_value: f64,
    /// Iterations used by the solver
    pub iterations: usize,
    /// Set when the result is best-effort only
    pub warning: Option<ConvergenceWarning>,
}

impl ConfinedFitResult {
    /// True when the solver certified its result.
    pub fn is_optimal(&self) -> bool {
        self.warning.is_none()
    }
}

/// Fitter for the confined-diffusion MSD model.
#[derive(Clone)]
pub struct ConfinedDiffusionMsdCurveFit {
    method: FitMethod,
    initial: Option<[f64; PARAMETER_COUNT]>,
    config: SolverConfig,
    solver: Option<Arc<dyn NlpSolver>>,
}

impl std::fmt::Debug for ConfinedDiffusionMsdCurveFit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfinedDiffusionMsdCurveFit")
            .field("method", &self.method)
            .field("initial", &self.initial)
            .field("config", &self.config)
            .field("solver", &self.solver.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

impl ConfinedDiffusionMsdCurveFit {
    /// Fitter using `method`, the standard solver settings and the compiled-in
    /// constrained backend (if any).
    pub fn new(method: FitMethod) -> Self {
        Self {
            method,
            initial: None,
            config: SolverConfig::standard(),
            solver: default_nlp_solver(),
        }
    }

    /// Use different solver settings; `max_iterations` also bounds the
    /// constrained backend.
    pub fn with_config(mut self, config: SolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `solver` for [`FitMethod::Constrained`].
    pub fn with_solver(mut self, solver: Arc<dyn NlpSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    /// Drop any constrained backend.
    pub fn without_solver(mut self) -> Self {
        self.solver = None;
        self
    }

    /// Selected strategy.
    pub fn method(&self) -> FitMethod {
        self.method
    }

    /// Starting values `[a, b, c, D]`.
    ///
    /// Without this call the fit starts from values derived from the data:
    /// `a` at the largest observation, `b = c = 1` and `D` from the initial
    /// slope of the curve. It does not start from zeros.
    ///
    /// # Errors
    /// * `InvalidInput` for non-finite values.
    pub fn set_initial_parameters(&mut self, initial: [f64; PARAMETER_COUNT]) -> DiffusionResult<()> {
        validate_all_finite(&initial, "initial parameters")?;
        self.initial = Some(initial);
        Ok(())
    }

    /// Starting values, if set explicitly. `None` means the data-driven start
    /// described on [`set_initial_parameters`](Self::set_initial_parameters).
    pub fn initial_parameters(&self) -> Option<[f64; PARAMETER_COUNT]> {
        self.initial
    }

    /// Fit the model to an MSD curve (lag times against MSD).
    pub fn fit_curve(&self, curve: &MsdCurve) -> DiffusionResult<ConfinedFitResult> {
        self.fit(&curve.times, &curve.msd)
    }

    /// Fit the model to `(x, y)` data.
    ///
    /// # Errors
    /// * `SolverUnavailable` for [`FitMethod::Constrained`] without a backend.
    /// * `InvalidInput` for mismatched lengths or non-finite data.
    /// * `InsufficientData` for fewer than four points.
    pub fn fit(&self, x: &[f64], y: &[f64]) -> DiffusionResult<ConfinedFitResult> {
        let solver = match self.method {
            FitMethod::Constrained => Some(self.solver.clone().ok_or_else(|| {
                DiffusionError::SolverUnavailable {
                    solver: "constrained nonlinear solver".to_string(),
                    reason: "no backend configured; enable the `bounded-solver` feature or supply one with `with_solver`".to_string(),
                }
            })?),
            FitMethod::Simplex => None,
        };

        validate_fit_data(x, y)?;
        let start = self.initial.unwrap_or_else(|| default_initial_parameters(x, y));

        let result = match solver {
            None => self.fit_unconstrained(x, y, start)?,
            Some(solver) => self.fit_constrained(x, y, start, solver.as_ref())?,
        };

        if let Some(warning) = &result.warning {
            log::warn!("confined diffusion fit: {}", warning);
        }
        Ok(result)
    }

    fn fit_unconstrained(&self, x: &[f64], y: &[f64], start: [f64; 4]) -> DiffusionResult<ConfinedFitResult> {
        let residuals = |p: &[f64]| model_residuals(x, y, &magnitudes(p));
        // d|p|/dp; signum(0.0) is 1, so a zero start still moves.
        let jacobian = |p: &[f64]| {
            let chain = [p[0].signum(), p[1].signum(), p[2].signum(), p[3].signum()];
            model_residual_jacobian(x, &magnitudes(p), chain)
        };
        let outcome =
            LeastSquaresSolver::new(self.config.clone()).minimize(&residuals, Some(&jacobian), &start)?;
        let parameters = ConfinedModelParameters::from_array(magnitudes(&outcome.point));

        let warning = (!outcome.converged).then(|| ConvergenceWarning {
            solver: "levenberg-marquardt".to_string(),
            iterations: outcome.evaluations,
            objective_value: outcome.value,
        });
        Ok(ConfinedFitResult {
            parameters,
            method: FitMethod::Simplex,
            objective_value: outcome.value,
            iterations: outcome.evaluations,
            warning,
        })
    }

    fn fit_constrained(
        &self,
        x: &[f64],
        y: &[f64],
        start: [f64; 4],
        solver: &dyn NlpSolver,
    ) -> DiffusionResult<ConfinedFitResult> {
        let program = NonlinearProgram::least_squares(|p: &[f64]| model_residuals(x, y, &as_parameters(p)))
            .with_jacobian(|p: &[f64]| model_residual_jacobian(x, &as_parameters(p), [1.0; 4]))
            .add_variable("a", 0.0, f64::INFINITY, start[0].max(0.0))
            .add_variable("b", 0.0, f64::INFINITY, start[1].max(0.0))
            .add_variable("c", 0.0, f64::INFINITY, start[2].max(0.0))
            .add_variable("D", 0.0, f64::INFINITY, start[3].max(0.0));

        let solution = solver.solve(&program, self.config.max_iterations)?;
        let primal = |name: &str| {
            solution.primal(name).ok_or_else(|| DiffusionError::NumericalError {
                reason: format!("solver {} returned no value for {}", solver.name(), name),
                operation: Some("confined diffusion fit".to_string()),
            })
        };
        let parameters = ConfinedModelParameters::new(primal("a")?, primal("b")?, primal("c")?, primal("D")?);

        let warning = (!solution.optimal).then(|| ConvergenceWarning {
            solver: solver.name().to_string(),
            iterations: solution.iterations,
            objective_value: solution.objective_value,
        });
        Ok(ConfinedFitResult {
            parameters,
            method: FitMethod::Constrained,
            objective_value: solution.objective_value,
            iterations: solution.iterations,
            warning,
        })
    }
}

fn validate_fit_data(x: &[f64], y: &[f64]) -> DiffusionResult<()> {
    if x.len() != y.len() {
        return Err(DiffusionError::InvalidInput {
            parameter: "y length".to_string(),
            value: y.len() as f64,
            constraint: format!("== x length ({})", x.len()),
        });
    }
    if x.len() < PARAMETER_COUNT {
        return Err(DiffusionError::InsufficientData {
            operation: "confined diffusion fit".to_string(),
            lag: 0,
            required: PARAMETER_COUNT,
            actual: x.len(),
        });
    }
    validate_all_finite(x, "x")?;
    validate_all_finite(y, "y")
}

/// Data-driven start: plateau at the largest observation, `b = c = 1`, and
/// `D` from the initial slope (`dy/dx = 4·b·c·D` at the origin).
fn default_initial_parameters(x: &[f64], y: &[f64]) -> [f64; 4] {
    let a = y.iter().copied().fold(0.0, f64::max);

    let mut order: Vec<usize> = (0..x.len()).collect();
    order.sort_by(|&i, &j| x[i].total_cmp(&x[j]));
    let (i0, i1) = (order[0], order[1]);
    let slope = if x[i1] > x[i0] {
        (y[i1] - y[i0]) / (x[i1] - x[i0])
    } else if x[i0] > 0.0 {
        y[i0] / x[i0]
    } else {
        0.0
    };

    let x_max = x[order[order.len() - 1]];
    let d = if slope.is_finite() && slope > 0.0 {
        slope / 4.0
    } else if a > 0.0 && x_max > 0.0 {
        a / (4.0 * x_max)
    } else {
        0.0
    };

    [a, 1.0, 1.0, d]
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn synthetic(params: ConfinedModelParameters) -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (1..=30).map(|i| i as f64 * 0.1).collect();
        let y = params.model_curve(&x);
        (x, y)
    }

    #[test]
    fn test_model_evaluation() {
        let p = ConfinedModelParameters::new(2.0, 1.0, 1.0, 0.5);
        assert_approx_eq!(p.evaluate(0.0), 0.0);
        assert_approx_eq!(p.evaluate(1.0), 2.0 * (1.0 - (-1.0f64).exp()), 1e-12);
        assert!((p.evaluate(100.0) - 2.0).abs() < 1e-12);
        assert_eq!(ConfinedModelParameters::new(0.0, 1.0, 1.0, 1.0).evaluate(3.0), 0.0);
        assert_eq!(ConfinedModelParameters::from_array(p.to_array()), p);
    }

    #[test]
    fn test_simplex_round_trip() {
        let truth = ConfinedModelParameters::new(2.0, 0.9, 1.0, 0.5);
        let (x, y) = synthetic(truth);
        let result = ConfinedDiffusionMsdCurveFit::new(FitMethod::Simplex).fit(&x, &y).unwrap();
        let p = result.parameters;
        assert_approx_eq!(p.a, truth.a, 1e-3);
        assert_approx_eq!(p.b, truth.b, 1e-3);
        assert_approx_eq!(p.c * p.d, truth.c * truth.d, 1e-3);
        assert!(result.objective_value < 1e-8);
        assert_eq!(result.method, FitMethod::Simplex);
    }

    #[cfg(feature = "bounded-solver")]
    #[test]
    fn test_constrained_round_trip() {
        let truth = ConfinedModelParameters::new(1.5, 0.8, 2.0, 0.25);
        let (x, y) = synthetic(truth);
        let mut fitter = ConfinedDiffusionMsdCurveFit::new(FitMethod::Constrained);
        fitter.set_initial_parameters([1.0, 1.0, 1.0, 1.0]).unwrap();
        let result = fitter.fit(&x, &y).unwrap();
        let p = result.parameters;
        assert!(p.a >= 0.0 && p.b >= 0.0 && p.c >= 0.0 && p.d >= 0.0);
        assert_approx_eq!(p.a, truth.a, 1e-3);
        assert_approx_eq!(p.b, truth.b, 1e-3);
        assert_approx_eq!(p.c * p.d, truth.c * truth.d, 1e-3);
    }

    #[test]
    fn test_constrained_without_solver_is_unavailable() {
        let truth = ConfinedModelParameters::new(2.0, 0.9, 1.0, 0.5);
        let (x, y) = synthetic(truth);
        let fitter = ConfinedDiffusionMsdCurveFit::new(FitMethod::Constrained).without_solver();
        assert!(matches!(
            fitter.fit(&x, &y),
            Err(DiffusionError::SolverUnavailable { .. })
        ));
        // The unconstrained path does not need a backend.
        let simplex = ConfinedDiffusionMsdCurveFit::new(FitMethod::Simplex).without_solver();
        assert!(simplex.fit(&x, &y).is_ok());
    }

    #[test]
    fn test_fit_input_validation() {
        let fitter = ConfinedDiffusionMsdCurveFit::new(FitMethod::Simplex);
        assert!(fitter.fit(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0]).unwrap_err().is_invalid_input());
        assert!(fitter.fit(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap_err().is_insufficient_data());
        assert!(fitter
            .fit(&[1.0, 2.0, 3.0, 4.0], &[1.0, f64::NAN, 3.0, 4.0])
            .unwrap_err()
            .is_invalid_input());

        let mut fitter = fitter;
        assert!(fitter.set_initial_parameters([1.0, f64::INFINITY, 1.0, 1.0]).is_err());
        assert_eq!(fitter.initial_parameters(), None);
    }

    #[test]
    fn test_iteration_limit_yields_warning() {
        let truth = ConfinedModelParameters::new(2.0, 0.9, 1.0, 0.5);
        let (x, y) = synthetic(truth);
        let config = SolverConfig::standard().with_max_iterations(5);
        let mut fitter = ConfinedDiffusionMsdCurveFit::new(FitMethod::Simplex).with_config(config);
        fitter.set_initial_parameters([5.0, 0.1, 3.0, 3.0]).unwrap();
        let result = fitter.fit(&x, &y).unwrap();
        assert!(!result.is_optimal());
        let warning = result.warning.unwrap();
        assert_eq!(warning.iterations, result.iterations);
        assert_eq!(warning.solver, "levenberg-marquardt");
        assert!(warning.objective_value > 1e-6);
    }

    #[test]
    fn test_model_gradient_matches_finite_differences() {
        let x: Vec<f64> = vec![0.05, 0.4, 1.3, 2.7];
        let p = [1.7, 0.6, 1.4, 0.3];
        let analytic = model_residual_jacobian(&x, &p, [1.0; 4]);
        let residuals = |q: &[f64]| model_residuals(&x, &[0.0; 4], &as_parameters(q));
        let numerical = crate::optimization::numerical_jacobian(&residuals, &p);
        for (a, n) in analytic.iter().zip(numerical.iter()) {
            assert_approx_eq!(*a, *n, 1e-6);
        }
    }

    #[test]
    fn test_unset_initial_parameters_use_data_driven_start() {
        let truth = ConfinedModelParameters::new(2.0, 0.9, 1.0, 0.5);
        let (x, y) = synthetic(truth);
        let implicit = ConfinedDiffusionMsdCurveFit::new(FitMethod::Simplex);
        assert_eq!(implicit.initial_parameters(), None);

        let mut explicit = ConfinedDiffusionMsdCurveFit::new(FitMethod::Simplex);
        explicit
            .set_initial_parameters(default_initial_parameters(&x, &y))
            .unwrap();
        assert_eq!(implicit.fit(&x, &y).unwrap(), explicit.fit(&x, &y).unwrap());
        assert_ne!(default_initial_parameters(&x, &y), [0.0; 4]);
    }

    #[test]
    fn test_default_initial_parameters() {
        let x = vec![0.1, 0.2, 0.3, 0.4];
        let y = vec![0.4, 0.8, 1.0, 1.1];
        let p = default_initial_parameters(&x, &y);
        assert_approx_eq!(p[0], 1.1);
        assert_approx_eq!(p[1], 1.0);
        assert_approx_eq!(p[2], 1.0);
        assert_approx_eq!(p[3], 1.0, 1e-9);

        let flat = default_initial_parameters(&x, &[0.0; 4]);
        assert_eq!(flat, [0.0, 1.0, 1.0, 0.0]);
    }
}
