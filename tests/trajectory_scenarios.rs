//! Integration tests on small hand-built trajectories
//!
//! Exact expected values for the estimators and MSD evaluators, gap handling
//! and error reporting on degenerate input.

use assert_approx_eq::assert_approx_eq;
use trajectory_diffusion::{
    errors::DiffusionError, max_distance_from_start, msd_curve,
    CovarianceDiffusionCoefficientEstimator, DiffusionCoefficientEstimator, DirectionalMsd,
    LinearDriftCorrector, MeanSquaredDisplacement, MsdEvaluator,
    RegressionDiffusionCoefficientEstimator, Trajectory, TrajectoryBuilder,
};

fn ballistic() -> Trajectory {
    let mut b = TrajectoryBuilder::new(2);
    b.push_xyz(0.0, 0.0, 0.0)
        .push_xyz(1.0, 0.0, 0.0)
        .push_xyz(2.0, 0.0, 0.0);
    b.build().unwrap()
}

fn wiggle(dimension: usize) -> Trajectory {
    let mut b = TrajectoryBuilder::new(dimension);
    for i in 0..40 {
        let t = i as f64;
        b.push_xyz((0.3 * t).sin() + 0.1 * t, (0.7 * t).cos(), 0.05 * t * t);
    }
    b.build().unwrap()
}

/// Scenario: three collinear unit steps along x in a 2D trajectory
#[test]
fn test_ballistic_covariance_scenario() {
    let estimate = CovarianceDiffusionCoefficientEstimator::new()
        .estimate(&ballistic(), 1.0)
        .unwrap();
    assert_approx_eq!(estimate.msd[0], 1.0);
    assert_approx_eq!(estimate.cov[0], 1.0);
    assert_approx_eq!(estimate.axis_diffusion[0], 1.5);
    assert_approx_eq!(estimate.axis_diffusion[1], 0.0);
    assert_approx_eq!(estimate.diffusion_coefficient, 0.75);
    assert_eq!(estimate.displacement_count, 2);
    assert_eq!(estimate.pair_count, 1);
}

/// Scenario: a single lag passes the fit through the origin
#[test]
fn test_single_lag_regression_through_origin() {
    let estimate = RegressionDiffusionCoefficientEstimator::new(1, 1)
        .unwrap()
        .estimate(&ballistic(), 1.0)
        .unwrap();
    assert_approx_eq!(estimate.intercept, 0.0, 1e-12);
    assert_approx_eq!(estimate.slope, 1.0, 1e-12);
    assert_approx_eq!(estimate.diffusion_coefficient, 0.25, 1e-12);
}

/// Scenario: a one-position trajectory is rejected by every estimator
#[test]
fn test_single_position_rejected_by_all_estimators() {
    let mut b = TrajectoryBuilder::new(2);
    b.push_xyz(1.0, 2.0, 0.0);
    let single = b.build().unwrap();

    let estimators: Vec<Box<dyn DiffusionCoefficientEstimator>> = vec![
        Box::new(CovarianceDiffusionCoefficientEstimator::new()),
        Box::new(RegressionDiffusionCoefficientEstimator::new(1, 3).unwrap()),
    ];
    for estimator in &estimators {
        match estimator.diffusion_coefficient(&single, 10.0) {
            Err(DiffusionError::InvalidInput { .. }) => {}
            other => panic!("{}: expected InvalidInput, got {:?}", estimator.name(), other),
        }
    }
}

#[test]
fn test_gap_removes_only_pairs_touching_it() {
    let mut b = TrajectoryBuilder::new(1);
    for i in 0..10 {
        if i == 6 {
            b.push_gap();
        } else {
            b.push_xyz(i as f64, 0.0, 0.0);
        }
    }
    let t = b.build().unwrap();

    for lag in 1..4 {
        let indices: Vec<usize> = t.valid_indices(lag).unwrap().collect();
        let expected: Vec<usize> = (0..10 - lag).filter(|&i| i != 6 && i + lag != 6).collect();
        assert_eq!(indices, expected, "lag {}", lag);

        // Unit velocity: every valid displacement at `lag` is exactly `lag`
        let sample = MeanSquaredDisplacement::new().evaluate(&t, lag).unwrap();
        assert_eq!(sample.sample_count, expected.len());
        assert_approx_eq!(sample.msd, (lag * lag) as f64);
        assert_approx_eq!(sample.variance, 0.0);
    }
}

#[test]
fn test_msd_is_sum_of_directional_msd() {
    let t = wiggle(3);
    for lag in [1, 4, 9] {
        let total = MeanSquaredDisplacement::new().evaluate(&t, lag).unwrap().msd;
        let parts: f64 = (0..3)
            .map(|axis| DirectionalMsd::new(axis).unwrap().evaluate(&t, lag).unwrap().msd)
            .sum();
        assert_approx_eq!(total, parts, 1e-9);
    }
}

#[test]
fn test_msd_invariant_under_axis_permutation() {
    let t = wiggle(3);
    let permuted = Trajectory::from_positions(
        3,
        t.positions()
            .iter()
            .map(|p| p.map(|p| nalgebra::Point3::new(p.z, p.x, p.y)))
            .collect(),
    )
    .unwrap();
    let msd = MeanSquaredDisplacement::new();
    for lag in 1..10 {
        assert_approx_eq!(
            msd.evaluate(&t, lag).unwrap().msd,
            msd.evaluate(&permuted, lag).unwrap().msd,
            1e-9
        );
    }
    // Per-axis values move with the permutation
    let x = DirectionalMsd::new(0).unwrap().evaluate(&t, 3).unwrap().msd;
    let y_permuted = DirectionalMsd::new(1).unwrap().evaluate(&permuted, 3).unwrap().msd;
    assert_approx_eq!(x, y_permuted, 1e-12);
}

#[test]
fn test_lag_beyond_length_is_insufficient_data() {
    let t = ballistic();
    match MeanSquaredDisplacement::new().evaluate(&t, 5) {
        Err(DiffusionError::InsufficientData { lag, actual, .. }) => {
            assert_eq!(lag, 5);
            assert_eq!(actual, 0);
        }
        other => panic!("expected InsufficientData, got {:?}", other),
    }
    // msd_curve keeps the lags that have data
    let curve = msd_curve(&t, &MeanSquaredDisplacement::new(), 1, 5, 2.0).unwrap();
    assert_eq!(curve.lags, vec![1, 2]);
    assert_approx_eq!(curve.times[1], 1.0);
    assert_approx_eq!(curve.msd[1], 4.0);
}

#[test]
fn test_drift_correction_removes_ballistic_motion() {
    let corrected = LinearDriftCorrector::new([1.0, 0.0, 0.0])
        .unwrap()
        .remove_drift(&ballistic())
        .unwrap();
    assert_approx_eq!(max_distance_from_start(&ballistic()).unwrap(), 2.0);
    assert_approx_eq!(max_distance_from_start(&corrected).unwrap(), 0.0);

    let estimate = CovarianceDiffusionCoefficientEstimator::new()
        .estimate(&corrected, 1.0)
        .unwrap();
    assert_approx_eq!(estimate.diffusion_coefficient, 0.0);
}
