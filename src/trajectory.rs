//! Trajectory data model and valid-index iteration.
//!
//! A [`Trajectory`] is an ordered sequence of 3D positions with a fixed spatial
//! dimension. Frames in which the particle was not observed are stored as gaps
//! (`None`). Gaps carry no information; every algorithm skips them through the
//! [`ValidIndexTimelagIterator`] instead of treating them as zero.

use crate::errors::{validate_dimension, validate_lag, DiffusionError, DiffusionResult};
use nalgebra::Point3;
use std::iter::FusedIterator;
use std::ops::Range;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Immutable, possibly gapped particle trajectory.
///
/// Construct with [`TrajectoryBuilder`] or [`Trajectory::from_positions`].
/// Always holds at least one entry; indices never change after construction.
///
/// Deserialization goes through the same checks as `from_positions`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "TrajectoryData"))]
pub struct Trajectory {
    dimension: usize,
    positions: Vec<Option<Point3<f64>>>,
}

/// Unchecked serialized form of [`Trajectory`].
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct TrajectoryData {
    dimension: usize,
    positions: Vec<Option<Point3<f64>>>,
}

#[cfg(feature = "serde")]
impl TryFrom<TrajectoryData> for Trajectory {
    type Error = DiffusionError;

    fn try_from(data: TrajectoryData) -> DiffusionResult<Self> {
        Trajectory::from_positions(data.dimension, data.positions)
    }
}

impl Trajectory {
    /// Build a trajectory from a complete list of positions and gaps.
    ///
    /// # Errors
    /// * `InvalidInput` if the dimension is not 1, 2 or 3, the list is empty,
    ///   or a coordinate is not finite.
    pub fn from_positions(
        dimension: usize,
        positions: Vec<Option<Point3<f64>>>,
    ) -> DiffusionResult<Self> {
        validate_dimension(dimension)?;
        if positions.is_empty() {
            return Err(DiffusionError::InvalidInput {
                parameter: "trajectory length".to_string(),
                value: 0.0,
                constraint: ">= 1".to_string(),
            });
        }
        for (i, p) in positions.iter().enumerate() {
            if let Some(p) = p {
                if let Some(&bad) = p.coords.iter().find(|c| !c.is_finite()) {
                    return Err(DiffusionError::InvalidInput {
                        parameter: format!("position[{}]", i),
                        value: bad,
                        constraint: "finite coordinates".to_string(),
                    });
                }
            }
        }
        Ok(Self {
            dimension,
            positions,
        })
    }

    /// Spatial dimension (1, 2 or 3).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of entries including gaps.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Always false; a trajectory holds at least one entry.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Position at `index`, or `None` for a gap or an out-of-range index.
    pub fn get(&self, index: usize) -> Option<&Point3<f64>> {
        self.positions.get(index).and_then(|p| p.as_ref())
    }

    /// True if `index` is in range and holds an observation.
    pub fn is_present(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// All entries, gaps included.
    pub fn positions(&self) -> &[Option<Point3<f64>>] {
        &self.positions
    }

    /// Number of gap entries.
    pub fn gap_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_none()).count()
    }

    /// Iterator over the start indices `i` for which both `i` and `i + lag`
    /// are observed.
    ///
    /// # Errors
    /// * `InvalidInput` if `lag == 0`.
    pub fn valid_indices(&self, lag: usize) -> DiffusionResult<ValidIndexTimelagIterator<'_>> {
        ValidIndexTimelagIterator::new(self, lag)
    }

    /// Copy of the entries in `range` as a new trajectory of the same dimension.
    ///
    /// # Errors
    /// * `InvalidInput` if the range is empty or exceeds the trajectory.
    pub fn subtrajectory(&self, range: Range<usize>) -> DiffusionResult<Trajectory> {
        if range.start >= range.end || range.end > self.len() {
            return Err(DiffusionError::InvalidInput {
                parameter: "range end".to_string(),
                value: range.end as f64,
                constraint: format!("non-empty range within 0..{}", self.len()),
            });
        }
        Ok(Trajectory {
            dimension: self.dimension,
            positions: self.positions[range].to_vec(),
        })
    }

    /// Error unless the trajectory has at least `required` entries.
    pub(crate) fn require_len(&self, required: usize) -> DiffusionResult<()> {
        if self.len() < required {
            return Err(DiffusionError::InvalidInput {
                parameter: "trajectory length".to_string(),
                value: self.len() as f64,
                constraint: format!(">= {}", required),
            });
        }
        Ok(())
    }
}

/// Append-only builder for [`Trajectory`].
#[derive(Debug, Clone)]
pub struct TrajectoryBuilder {
    dimension: usize,
    positions: Vec<Option<Point3<f64>>>,
}

impl TrajectoryBuilder {
    /// Start a trajectory with the given spatial dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            positions: Vec::new(),
        }
    }

    /// Start a trajectory with room for `capacity` entries.
    pub fn with_capacity(dimension: usize, capacity: usize) -> Self {
        Self {
            dimension,
            positions: Vec::with_capacity(capacity),
        }
    }

    /// Append an observed position.
    pub fn push(&mut self, position: Point3<f64>) -> &mut Self {
        self.positions.push(Some(position));
        self
    }

    /// Append an observed position given as coordinates.
    pub fn push_xyz(&mut self, x: f64, y: f64, z: f64) -> &mut Self {
        self.push(Point3::new(x, y, z))
    }

    /// Append a missing observation.
    pub fn push_gap(&mut self) -> &mut Self {
        self.positions.push(None);
        self
    }

    /// Number of entries appended so far.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// True if nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Validate and freeze the trajectory.
    pub fn build(self) -> DiffusionResult<Trajectory> {
        Trajectory::from_positions(self.dimension, self.positions)
    }
}

/// Lazily yields ascending start indices `i` with `positions[i]` and
/// `positions[i + lag]` both present.
///
/// Forward-only; create a new one to iterate again.
#[derive(Debug, Clone)]
pub struct ValidIndexTimelagIterator<'a> {
    trajectory: &'a Trajectory,
    lag: usize,
    next: usize,
}

impl<'a> ValidIndexTimelagIterator<'a> {
    /// # Errors
    /// * `InvalidInput` if `lag == 0`.
    pub fn new(trajectory: &'a Trajectory, lag: usize) -> DiffusionResult<Self> {
        validate_lag(lag)?;
        Ok(Self {
            trajectory,
            lag,
            next: 0,
        })
    }

    /// The lag this iterator pairs indices with.
    pub fn lag(&self) -> usize {
        self.lag
    }
}

impl Iterator for ValidIndexTimelagIterator<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let positions = self.trajectory.positions();
        while self.next + self.lag < positions.len() {
            let i = self.next;
            self.next += 1;
            if positions[i].is_some() && positions[i + self.lag].is_some() {
                return Some(i);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .trajectory
            .len()
            .saturating_sub(self.next + self.lag);
        (0, Some(remaining))
    }
}

impl FusedIterator for ValidIndexTimelagIterator<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> Trajectory {
        let mut builder = TrajectoryBuilder::new(2);
        for i in 0..n {
            builder.push_xyz(i as f64, 0.0, 0.0);
        }
        builder.build().unwrap()
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_applies_construction_checks() {
        let mut builder = TrajectoryBuilder::new(2);
        builder.push_xyz(0.0, 1.0, 0.0).push_gap().push_xyz(2.0, 3.0, 0.0);
        let t = builder.build().unwrap();

        let value = serde_json::to_value(&t).unwrap();
        let back: Trajectory = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(back, t);

        let mut zero_dimension = value.clone();
        zero_dimension["dimension"] = serde_json::json!(0);
        assert!(serde_json::from_value::<Trajectory>(zero_dimension).is_err());

        let mut empty = value;
        empty["positions"] = serde_json::json!([]);
        assert!(serde_json::from_value::<Trajectory>(empty).is_err());
    }

    #[test]
    fn test_iterator_without_gaps() {
        let t = line(10);
        for lag in 1..10 {
            let indices: Vec<usize> = t.valid_indices(lag).unwrap().collect();
            assert_eq!(indices, (0..10 - lag).collect::<Vec<_>>());
        }
        assert_eq!(t.valid_indices(10).unwrap().count(), 0);
    }

    #[test]
    fn test_single_gap_removes_referencing_pairs() {
        let mut positions: Vec<Option<Point3<f64>>> =
            (0..8).map(|i| Some(Point3::new(i as f64, 0.0, 0.0))).collect();
        positions[4] = None;
        let t = Trajectory::from_positions(1, positions).unwrap();

        let lag = 2;
        let indices: Vec<usize> = t.valid_indices(lag).unwrap().collect();
        // Pairs (2,4) and (4,6) reference the gap.
        assert_eq!(indices, vec![0, 1, 3, 5]);
        assert_eq!(indices.len(), 8 - lag - 2);
    }

    #[test]
    fn test_iterator_is_restartable() {
        let t = line(5);
        let first: Vec<usize> = t.valid_indices(1).unwrap().collect();
        let second: Vec<usize> = t.valid_indices(1).unwrap().collect();
        assert_eq!(first, second);

        let mut it = t.valid_indices(4).unwrap();
        assert_eq!(it.next(), Some(0));
        assert_eq!(it.next(), None);
        assert_eq!(it.next(), None);
    }

    #[test]
    fn test_zero_lag_rejected() {
        let t = line(3);
        assert!(t.valid_indices(0).unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_construction_validation() {
        assert!(TrajectoryBuilder::new(2).build().unwrap_err().is_invalid_input());
        assert!(Trajectory::from_positions(0, vec![Some(Point3::origin())]).is_err());
        assert!(Trajectory::from_positions(4, vec![Some(Point3::origin())]).is_err());
        assert!(
            Trajectory::from_positions(2, vec![Some(Point3::new(f64::NAN, 0.0, 0.0))]).is_err()
        );
    }

    #[test]
    fn test_gaps_and_accessors() {
        let mut builder = TrajectoryBuilder::new(3);
        builder.push_xyz(0.0, 0.0, 0.0).push_gap().push_xyz(1.0, 1.0, 1.0);
        let t = builder.build().unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.gap_count(), 1);
        assert!(t.is_present(0));
        assert!(!t.is_present(1));
        assert!(!t.is_present(7));
        assert_eq!(t.get(2), Some(&Point3::new(1.0, 1.0, 1.0)));
    }

    #[test]
    fn test_subtrajectory_is_a_copy() {
        let t = line(6);
        let sub = t.subtrajectory(2..5).unwrap();
        assert_eq!(sub.len(), 3);
        assert_eq!(sub.dimension(), 2);
        assert_eq!(sub.get(0), t.get(2));
        assert_eq!(t.len(), 6);
        assert!(t.subtrajectory(3..3).is_err());
        assert!(t.subtrajectory(0..7).is_err());
    }
}
