//! Linear drift removal.

use crate::errors::{validate_all_finite, DiffusionResult};
use crate::trajectory::Trajectory;
use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Removes a constant per-frame drift: position `i` becomes `p_i − i·drift`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinearDriftCorrector {
    drift: Vector3<f64>,
}

impl LinearDriftCorrector {
    /// Corrector for a drift of `[dx, dy, dz]` per frame.
    ///
    /// # Errors
    /// * `InvalidInput` for non-finite components.
    pub fn new(drift: [f64; 3]) -> DiffusionResult<Self> {
        validate_all_finite(&drift, "drift")?;
        Ok(Self {
            drift: Vector3::from(drift),
        })
    }

    /// Drift per frame.
    pub fn drift(&self) -> Vector3<f64> {
        self.drift
    }

    /// New trajectory with the drift removed. Gaps stay gaps at the same
    /// indices and the source is left untouched.
    pub fn remove_drift(&self, trajectory: &Trajectory) -> DiffusionResult<Trajectory> {
        let positions = trajectory
            .positions()
            .iter()
            .enumerate()
            .map(|(i, p)| p.map(|p| p - self.drift * i as f64))
            .collect();
        Trajectory::from_positions(trajectory.dimension(), positions)
    }
}
