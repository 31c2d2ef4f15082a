//! Nonlinear least-squares optimization used by the curve fits.
//!
//! [`LeastSquaresSolver`] runs the Levenberg–Marquardt algorithm of the
//! `levenberg-marquardt` crate on a residual function, with an analytic
//! Jacobian when one is supplied and forward differences otherwise.
//!
//! Constrained problems are posed as a [`NonlinearProgram`]: named decision
//! variables with bounds and initial values plus a residual function whose sum
//! of squares is minimized. Any [`NlpSolver`] backend can solve it and reports
//! a primal solution and an optimality flag. With the `bounded-solver` feature
//! the crate ships [`BoundedLeastSquaresSolver`]; other backends (e.g.
//! bindings to an interior-point library) plug in through the same trait.

use crate::config::SolverConfig;
use crate::errors::{validate_all_finite, DiffusionError, DiffusionResult};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{DMatrix, DVector, Dyn, VecStorage, U1};

/// Sum of squared residuals.
pub fn sum_of_squares(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

/// Forward-difference Jacobian of `residuals` at `x`, one row per residual.
///
/// Entries are NaN if the residual count changes between evaluations.
pub fn numerical_jacobian(residuals: &dyn Fn(&[f64]) -> Vec<f64>, x: &[f64]) -> DMatrix<f64> {
    let base = residuals(x);
    let mut jacobian = DMatrix::zeros(base.len(), x.len());
    let mut shifted = x.to_vec();
    for k in 0..x.len() {
        let h = f64::EPSILON.sqrt() * x[k].abs().max(1.0);
        shifted[k] = x[k] + h;
        let r = residuals(&shifted);
        if r.len() != base.len() {
            jacobian.fill(f64::NAN);
            return jacobian;
        }
        for (i, (ri, r0)) in r.iter().zip(&base).enumerate() {
            jacobian[(i, k)] = (ri - r0) / h;
        }
        shifted[k] = x[k];
    }
    jacobian
}

// ============================================================================
// LEVENBERG–MARQUARDT
// ============================================================================

/// Result of a least-squares minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquaresOutcome {
    /// Best point found
    pub point: Vec<f64>,
    /// Sum of squared residuals at `point`
    pub value: f64,
    /// Residual evaluations used
    pub evaluations: usize,
    /// Whether a convergence test was met before the evaluation limit
    pub converged: bool,
}

/// Adapter exposing closures as a `levenberg_marquardt` problem.
struct ResidualProblem<'p> {
    residuals: &'p dyn Fn(&[f64]) -> Vec<f64>,
    jacobian: Option<&'p dyn Fn(&[f64]) -> DMatrix<f64>>,
    residual_count: usize,
    params: DVector<f64>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for ResidualProblem<'_> {
    type ResidualStorage = VecStorage<f64, Dyn, U1>;
    type JacobianStorage = VecStorage<f64, Dyn, Dyn>;
    type ParameterStorage = VecStorage<f64, Dyn, U1>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = (self.residuals)(self.params.as_slice());
        let usable = r.len() == self.residual_count && r.iter().all(|v| v.is_finite());
        usable.then(|| DVector::from_vec(r))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let x = self.params.as_slice();
        let j = match self.jacobian {
            Some(jacobian) => jacobian(x),
            None => numerical_jacobian(self.residuals, x),
        };
        let usable = j.nrows() == self.residual_count
            && j.ncols() == x.len()
            && j.iter().all(|v| v.is_finite());
        usable.then_some(j)
    }
}

/// Levenberg–Marquardt minimizer of a sum of squared residuals.
#[derive(Debug, Clone, Default)]
pub struct LeastSquaresSolver {
    config: SolverConfig,
}

impl LeastSquaresSolver {
    /// Minimizer with the given settings.
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Settings in use.
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Minimize the sum of squares of `residuals` from `start`.
    ///
    /// `jacobian`, if given, returns the derivative of every residual (rows)
    /// with respect to every parameter (columns).
    ///
    /// # Errors
    /// * `InvalidInput` for an empty or non-finite start, an empty residual
    ///   vector or an invalid configuration.
    /// * `NumericalError` if the residuals are not finite at `start`.
    pub fn minimize(
        &self,
        residuals: &dyn Fn(&[f64]) -> Vec<f64>,
        jacobian: Option<&dyn Fn(&[f64]) -> DMatrix<f64>>,
        start: &[f64],
    ) -> DiffusionResult<LeastSquaresOutcome> {
        self.config.validate()?;
        if start.is_empty() {
            return Err(DiffusionError::InvalidInput {
                parameter: "start length".to_string(),
                value: 0.0,
                constraint: ">= 1".to_string(),
            });
        }
        validate_all_finite(start, "start")?;

        let initial = residuals(start);
        if initial.is_empty() {
            return Err(DiffusionError::InvalidInput {
                parameter: "residual count".to_string(),
                value: 0.0,
                constraint: ">= 1".to_string(),
            });
        }
        if initial.iter().any(|r| !r.is_finite()) {
            return Err(DiffusionError::NumericalError {
                reason: "residuals are not finite at the starting point".to_string(),
                operation: Some("least squares".to_string()),
            });
        }

        let problem = ResidualProblem {
            residuals,
            jacobian,
            residual_count: initial.len(),
            params: DVector::from_column_slice(start),
        };
        // Evaluations are capped at patience * (parameters + 1).
        let patience = self.config.max_iterations.div_ceil(start.len() + 1).max(1);
        let (problem, report) = LevenbergMarquardt::new()
            .with_ftol(self.config.ftol)
            .with_xtol(self.config.xtol)
            .with_gtol(self.config.gtol)
            .with_stepbound(self.config.stepbound)
            .with_patience(patience)
            .minimize(problem);

        let point: Vec<f64> = problem.params.iter().copied().collect();
        let value = sum_of_squares(&residuals(&point));
        let converged = report.termination.was_successful();
        log::debug!(
            "levenberg-marquardt: {:?} after {} evaluations, value={:.6e}",
            report.termination,
            report.number_of_evaluations,
            value
        );

        Ok(LeastSquaresOutcome {
            point,
            value,
            evaluations: report.number_of_evaluations,
            converged,
        })
    }
}

// ============================================================================
// NONLINEAR PROGRAM INTERFACE
// ============================================================================

/// Named decision variable with bounds and an initial value.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionVariable {
    /// Variable name
    pub name: String,
    /// Lower bound (may be `-inf`)
    pub lower: f64,
    /// Upper bound (may be `+inf`)
    pub upper: f64,
    /// Initial solution
    pub initial: f64,
}

type ResidualFn<'a> = Box<dyn Fn(&[f64]) -> Vec<f64> + 'a>;
type JacobianFn<'a> = Box<dyn Fn(&[f64]) -> DMatrix<f64> + 'a>;

/// Least-squares problem handed to an [`NlpSolver`].
pub struct NonlinearProgram<'a> {
    variables: Vec<DecisionVariable>,
    residuals: ResidualFn<'a>,
    jacobian: Option<JacobianFn<'a>>,
}

impl std::fmt::Debug for NonlinearProgram<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonlinearProgram")
            .field("variables", &self.variables)
            .field("analytic_jacobian", &self.jacobian.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a> NonlinearProgram<'a> {
    /// Problem minimizing the sum of squares of `residuals` over no
    /// variables yet.
    pub fn least_squares<F>(residuals: F) -> Self
    where
        F: Fn(&[f64]) -> Vec<f64> + 'a,
    {
        Self {
            variables: Vec::new(),
            residuals: Box::new(residuals),
            jacobian: None,
        }
    }

    /// Supply the analytic Jacobian of the residuals.
    pub fn with_jacobian<J>(mut self, jacobian: J) -> Self
    where
        J: Fn(&[f64]) -> DMatrix<f64> + 'a,
    {
        self.jacobian = Some(Box::new(jacobian));
        self
    }

    /// Declare a decision variable; variables are passed to the residual
    /// function in declaration order.
    pub fn add_variable(mut self, name: &str, lower: f64, upper: f64, initial: f64) -> Self {
        self.variables.push(DecisionVariable {
            name: name.to_string(),
            lower,
            upper,
            initial,
        });
        self
    }

    /// Declared variables.
    pub fn variables(&self) -> &[DecisionVariable] {
        &self.variables
    }

    /// Residuals at `x`.
    pub fn residuals(&self, x: &[f64]) -> Vec<f64> {
        (self.residuals)(x)
    }

    /// Jacobian of the residuals at `x`; forward differences when no analytic
    /// Jacobian was supplied.
    pub fn jacobian(&self, x: &[f64]) -> DMatrix<f64> {
        match &self.jacobian {
            Some(jacobian) => jacobian(x),
            None => numerical_jacobian(&*self.residuals, x),
        }
    }

    /// Objective value (sum of squared residuals) at `x`.
    pub fn objective(&self, x: &[f64]) -> f64 {
        sum_of_squares(&self.residuals(x))
    }
}

/// Solution returned by an [`NlpSolver`].
#[derive(Debug, Clone, PartialEq)]
pub struct NlpSolution {
    names: Vec<String>,
    primal: Vec<f64>,
    /// Objective value at the primal solution
    pub objective_value: f64,
    /// Whether the solver certified the solution as optimal
    pub optimal: bool,
    /// Iterations used
    pub iterations: usize,
}

impl NlpSolution {
    /// Assemble a solution for `program`'s variables.
    pub fn new(
        program: &NonlinearProgram<'_>,
        primal: Vec<f64>,
        objective_value: f64,
        optimal: bool,
        iterations: usize,
    ) -> Self {
        Self {
            names: program.variables().iter().map(|v| v.name.clone()).collect(),
            primal,
            objective_value,
            optimal,
            iterations,
        }
    }

    /// Primal value of the variable `name`.
    pub fn primal(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.primal.get(i).copied())
    }

    /// All primal values in declaration order.
    pub fn primal_values(&self) -> &[f64] {
        &self.primal
    }
}

/// Backend able to solve a bound-constrained [`NonlinearProgram`].
pub trait NlpSolver: Send + Sync {
    /// Backend name used in diagnostics.
    fn name(&self) -> &str;

    /// Solve `program` within `max_iterations`.
    ///
    /// A solve that stops without certifying optimality still returns `Ok`
    /// with `optimal == false`.
    fn solve(&self, program: &NonlinearProgram<'_>, max_iterations: usize) -> DiffusionResult<NlpSolution>;
}

// ============================================================================
// BOUNDED BACKEND
// ============================================================================

/// Smallest distance from a bound at which a start is placed, so the
/// transform keeps a non-zero derivative there.
#[cfg(feature = "bounded-solver")]
const BOUNDARY_OFFSET: f64 = 1e-6;

/// Smooth map from an unbounded internal coordinate onto a variable's bounds.
#[cfg(feature = "bounded-solver")]
#[derive(Debug, Clone, Copy, PartialEq)]
enum BoundTransform {
    Free,
    Lower(f64),
    Upper(f64),
    Interval(f64, f64),
    Fixed(f64),
}

#[cfg(feature = "bounded-solver")]
impl BoundTransform {
    fn new(lower: f64, upper: f64) -> Self {
        if lower == upper {
            return Self::Fixed(lower);
        }
        match (lower.is_finite(), upper.is_finite()) {
            (true, true) => Self::Interval(lower, upper),
            (true, false) => Self::Lower(lower),
            (false, true) => Self::Upper(upper),
            (false, false) => Self::Free,
        }
    }

    fn is_fixed(self) -> bool {
        matches!(self, Self::Fixed(_))
    }

    fn to_external(self, u: f64) -> f64 {
        match self {
            Self::Free => u,
            Self::Lower(lo) => lo - 1.0 + (u * u + 1.0).sqrt(),
            Self::Upper(hi) => hi + 1.0 - (u * u + 1.0).sqrt(),
            Self::Interval(lo, hi) => lo + (hi - lo) * (u.sin() + 1.0) / 2.0,
            Self::Fixed(value) => value,
        }
    }

    fn derivative(self, u: f64) -> f64 {
        match self {
            Self::Free => 1.0,
            Self::Lower(_) => u / (u * u + 1.0).sqrt(),
            Self::Upper(_) => -u / (u * u + 1.0).sqrt(),
            Self::Interval(lo, hi) => (hi - lo) * u.cos() / 2.0,
            Self::Fixed(_) => 0.0,
        }
    }

    fn to_internal(self, x: f64) -> f64 {
        match self {
            Self::Free => x,
            Self::Lower(lo) => {
                let s = (x - lo).max(BOUNDARY_OFFSET) + 1.0;
                (s * s - 1.0).sqrt()
            }
            Self::Upper(hi) => {
                let s = (hi - x).max(BOUNDARY_OFFSET) + 1.0;
                (s * s - 1.0).sqrt()
            }
            Self::Interval(lo, hi) => {
                let limit = 1.0 - BOUNDARY_OFFSET;
                (2.0 * (x - lo) / (hi - lo) - 1.0).clamp(-limit, limit).asin()
            }
            Self::Fixed(_) => 0.0,
        }
    }
}

/// Built-in bound-constrained backend: Levenberg–Marquardt on internal
/// coordinates mapped smoothly onto each variable's bounds.
///
/// Variables with `lower == upper` are held fixed.
#[cfg(feature = "bounded-solver")]
#[derive(Debug, Clone, Default)]
pub struct BoundedLeastSquaresSolver {
    config: SolverConfig,
}

#[cfg(feature = "bounded-solver")]
impl BoundedLeastSquaresSolver {
    /// Backend with the given settings; the evaluation limit is taken from
    /// each `solve` call.
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }
}

#[cfg(feature = "bounded-solver")]
impl NlpSolver for BoundedLeastSquaresSolver {
    fn name(&self) -> &str {
        "bounded-levenberg-marquardt"
    }

    fn solve(&self, program: &NonlinearProgram<'_>, max_iterations: usize) -> DiffusionResult<NlpSolution> {
        let variables = program.variables();
        for v in variables {
            let usable = !v.lower.is_nan()
                && !v.upper.is_nan()
                && v.lower <= v.upper
                && v.lower < f64::INFINITY
                && v.upper > f64::NEG_INFINITY;
            if !usable {
                return Err(DiffusionError::InvalidInput {
                    parameter: format!("bounds of {}", v.name),
                    value: v.lower,
                    constraint: "lower <= upper".to_string(),
                });
            }
        }

        let transforms: Vec<BoundTransform> = variables
            .iter()
            .map(|v| BoundTransform::new(v.lower, v.upper))
            .collect();
        let free: Vec<usize> = (0..transforms.len())
            .filter(|&i| !transforms[i].is_fixed())
            .collect();
        let to_external = |u: &[f64]| -> Vec<f64> {
            let mut x: Vec<f64> = transforms.iter().map(|t| t.to_external(0.0)).collect();
            for (&i, &ui) in free.iter().zip(u) {
                x[i] = transforms[i].to_external(ui);
            }
            x
        };

        if free.is_empty() {
            let x = to_external(&[]);
            let value = program.objective(&x);
            return Ok(NlpSolution::new(program, x, value, true, 0));
        }

        let start: Vec<f64> = free
            .iter()
            .map(|&i| transforms[i].to_internal(variables[i].initial))
            .collect();
        let residuals = |u: &[f64]| program.residuals(&to_external(u));
        let jacobian = |u: &[f64]| {
            let external = program.jacobian(&to_external(u));
            if external.ncols() != transforms.len() {
                return DMatrix::from_element(external.nrows(), free.len(), f64::NAN);
            }
            // Chain rule through the bound transform, one column per free variable.
            let mut internal = DMatrix::zeros(external.nrows(), free.len());
            for (k, (&i, &uk)) in free.iter().zip(u).enumerate() {
                let scale = transforms[i].derivative(uk);
                internal.set_column(k, &(external.column(i) * scale));
            }
            internal
        };

        let solver = LeastSquaresSolver::new(self.config.clone().with_max_iterations(max_iterations));
        let outcome = solver.minimize(&residuals, Some(&jacobian), &start)?;

        Ok(NlpSolution::new(
            program,
            to_external(&outcome.point),
            outcome.value,
            outcome.converged,
            outcome.evaluations,
        ))
    }
}

/// The solver used when none is supplied, if one is compiled in.
pub fn default_nlp_solver() -> Option<std::sync::Arc<dyn NlpSolver>> {
    #[cfg(feature = "bounded-solver")]
    {
        Some(std::sync::Arc::new(BoundedLeastSquaresSolver::default()))
    }
    #[cfg(not(feature = "bounded-solver"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn rosenbrock(x: &[f64]) -> Vec<f64> {
        vec![1.0 - x[0], 10.0 * (x[1] - x[0] * x[0])]
    }

    fn rosenbrock_jacobian(x: &[f64]) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, -20.0 * x[0], 10.0])
    }

    #[test]
    fn test_levenberg_marquardt_rosenbrock() {
        let solver = LeastSquaresSolver::default();
        let outcome = solver
            .minimize(&rosenbrock, Some(&rosenbrock_jacobian), &[-1.2, 1.0])
            .unwrap();
        assert!(outcome.converged);
        assert_approx_eq!(outcome.point[0], 1.0, 1e-8);
        assert_approx_eq!(outcome.point[1], 1.0, 1e-8);
        assert!(outcome.value < 1e-16);
    }

    #[test]
    fn test_levenberg_marquardt_numerical_jacobian() {
        let solver = LeastSquaresSolver::default();
        let residuals = |x: &[f64]| vec![x[0] - 3.0, x[1] + 0.5, x[0] * x[1] + 1.5];
        let outcome = solver.minimize(&residuals, None, &[0.0, 0.0]).unwrap();
        assert_approx_eq!(outcome.point[0], 3.0, 1e-6);
        assert_approx_eq!(outcome.point[1], -0.5, 1e-6);
    }

    #[test]
    fn test_numerical_jacobian_matches_analytic() {
        let x = [0.7, -0.3];
        let numerical = numerical_jacobian(&rosenbrock, &x);
        let analytic = rosenbrock_jacobian(&x);
        for (n, a) in numerical.iter().zip(analytic.iter()) {
            assert_approx_eq!(*n, *a, 1e-6);
        }
    }

    #[test]
    fn test_levenberg_marquardt_evaluation_limit() {
        let solver = LeastSquaresSolver::new(SolverConfig::standard().with_max_iterations(3));
        let outcome = solver
            .minimize(&rosenbrock, Some(&rosenbrock_jacobian), &[-1.2, 1.0])
            .unwrap();
        assert!(!outcome.converged);
        assert!(outcome.value > 1e-6);
    }

    #[test]
    fn test_levenberg_marquardt_input_validation() {
        let solver = LeastSquaresSolver::default();
        assert!(solver.minimize(&rosenbrock, None, &[]).unwrap_err().is_invalid_input());
        assert!(solver
            .minimize(&rosenbrock, None, &[f64::NAN, 0.0])
            .unwrap_err()
            .is_invalid_input());
        let empty = |_: &[f64]| Vec::<f64>::new();
        assert!(solver.minimize(&empty, None, &[1.0]).unwrap_err().is_invalid_input());
        let infinite = |_: &[f64]| vec![f64::INFINITY];
        assert!(matches!(
            solver.minimize(&infinite, None, &[1.0]),
            Err(DiffusionError::NumericalError { .. })
        ));
    }

    #[test]
    fn test_nonlinear_program_primal_lookup() {
        let program = NonlinearProgram::least_squares(|x: &[f64]| vec![x[0], x[1]])
            .add_variable("a", 0.0, 1.0, 0.5)
            .add_variable("b", 0.0, 1.0, 0.5);
        assert_eq!(program.variables().len(), 2);
        assert_approx_eq!(program.objective(&[1.0, 2.0]), 5.0);
        assert_approx_eq!(program.jacobian(&[1.0, 2.0])[(1, 1)], 1.0, 1e-6);

        let solution = NlpSolution::new(&program, vec![0.1, 0.2], 0.3, true, 7);
        assert_eq!(solution.primal("b"), Some(0.2));
        assert_eq!(solution.primal("c"), None);
        assert_eq!(solution.primal_values(), &[0.1, 0.2]);
    }

    #[cfg(feature = "bounded-solver")]
    #[test]
    fn test_bound_transform_round_trip() {
        for (t, x) in [
            (BoundTransform::new(0.0, f64::INFINITY), 2.5),
            (BoundTransform::new(f64::NEG_INFINITY, 1.0), -4.0),
            (BoundTransform::new(-1.0, 3.0), 0.25),
            (BoundTransform::new(f64::NEG_INFINITY, f64::INFINITY), -7.0),
        ] {
            assert_approx_eq!(t.to_external(t.to_internal(x)), x, 1e-12);
        }
        let lower = BoundTransform::new(0.0, f64::INFINITY);
        assert!(lower.derivative(lower.to_internal(0.0)) > 0.0);
        assert_eq!(BoundTransform::new(2.0, 2.0).to_external(5.0), 2.0);
    }

    #[cfg(feature = "bounded-solver")]
    #[test]
    fn test_bounded_solver_interior_optimum() {
        let program = NonlinearProgram::least_squares(|x: &[f64]| vec![x[0] - 2.0, x[1] - 0.5])
            .add_variable("p", 0.0, f64::INFINITY, 1.0)
            .add_variable("q", 0.0, 10.0, 1.0);
        let solution = BoundedLeastSquaresSolver::default().solve(&program, 10_000).unwrap();
        assert!(solution.optimal);
        assert_approx_eq!(solution.primal("p").unwrap(), 2.0, 1e-8);
        assert_approx_eq!(solution.primal("q").unwrap(), 0.5, 1e-8);
        assert!(default_nlp_solver().is_some());
    }

    #[cfg(feature = "bounded-solver")]
    #[test]
    fn test_bounded_solver_active_bound() {
        let program = NonlinearProgram::least_squares(|x: &[f64]| vec![x[0] - 2.0, x[1] + 1.0])
            .add_variable("p", 0.0, f64::INFINITY, 1.0)
            .add_variable("q", 0.0, f64::INFINITY, 1.0)
            .add_variable("r", 4.0, 4.0, 0.0);
        let solution = BoundedLeastSquaresSolver::default().solve(&program, 10_000).unwrap();
        let q = solution.primal("q").unwrap();
        assert!(q >= 0.0);
        assert_approx_eq!(q, 0.0, 1e-6);
        assert_approx_eq!(solution.primal("p").unwrap(), 2.0, 1e-6);
        assert_eq!(solution.primal("r"), Some(4.0));
        assert_approx_eq!(solution.objective_value, 1.0, 1e-6);
    }

    #[cfg(feature = "bounded-solver")]
    #[test]
    fn test_bounded_solver_rejects_inverted_bounds() {
        let program =
            NonlinearProgram::least_squares(|x: &[f64]| vec![x[0]]).add_variable("p", 1.0, 0.0, 0.5);
        assert!(BoundedLeastSquaresSolver::default()
            .solve(&program, 100)
            .unwrap_err()
            .is_invalid_input());
    }
}
