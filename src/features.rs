//! Simple geometric trajectory features.

use crate::errors::{DiffusionError, DiffusionResult};
use crate::trajectory::Trajectory;
use nalgebra::distance;

/// Largest Euclidean distance between the start position and any later
/// observed position. Gaps are skipped; a single position gives `0`.
///
/// # Errors
/// * `InvalidInput` if the first position is a gap.
pub fn max_distance_from_start(trajectory: &Trajectory) -> DiffusionResult<f64> {
    let start = trajectory.get(0).ok_or_else(|| DiffusionError::InvalidInput {
        parameter: "position[0]".to_string(),
        value: f64::NAN,
        constraint: "start position must be observed".to_string(),
    })?;
    Ok(trajectory
        .positions()
        .iter()
        .skip(1)
        .flatten()
        .map(|p| distance(start, p))
        .fold(0.0, f64::max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::TrajectoryBuilder;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_max_distance_skips_gaps() {
        let mut b = TrajectoryBuilder::new(3);
        b.push_xyz(1.0, 1.0, 1.0)
            .push_xyz(2.0, 1.0, 1.0)
            .push_gap()
            .push_xyz(4.0, 5.0, 1.0)
            .push_xyz(1.0, 2.0, 1.0);
        let t = b.build().unwrap();
        assert_approx_eq!(max_distance_from_start(&t).unwrap(), 5.0);
    }

    #[test]
    fn test_max_distance_single_position() {
        let mut b = TrajectoryBuilder::new(2);
        b.push_xyz(3.0, 4.0, 0.0);
        assert_eq!(max_distance_from_start(&b.build().unwrap()).unwrap(), 0.0);
    }

    #[test]
    fn test_max_distance_requires_start() {
        let mut b = TrajectoryBuilder::new(2);
        b.push_gap().push_xyz(1.0, 0.0, 0.0);
        assert!(max_distance_from_start(&b.build().unwrap())
            .unwrap_err()
            .is_invalid_input());
    }
}
