//! Seedable random number generation for trajectory simulation.
//!
//! Simulators take any `rand::RngCore`, so callers may pass their own generator.
//! [`SimulationRng`] is the crate's ChaCha20-backed default: OS entropy for
//! production runs, `with_seed` for reproducible ones. [`SharedRng`] wraps one
//! generator for use across threads.

use crate::errors::{DiffusionError, DiffusionResult};
use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::sync::{Arc, Mutex};

/// ChaCha20 generator used by the simulators.
#[derive(Debug, Clone)]
pub struct SimulationRng {
    rng: ChaCha20Rng,
    seed: Option<u64>,
}

impl Default for SimulationRng {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationRng {
    /// Generator seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: ChaCha20Rng::from_entropy(),
            seed: None,
        }
    }

    /// Deterministic generator. The `u64` is expanded to a full 256-bit key.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
            seed: Some(seed),
        }
    }

    /// Seed used at construction, if any.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

impl RngCore for SimulationRng {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.rng.try_fill_bytes(dest)
    }
}

impl CryptoRng for SimulationRng {}

/// Thread-safe handle to a single [`SimulationRng`].
///
/// Clones share the same generator. A lock poisoned by a panicking user is
/// reported as `ConcurrencyError`.
#[derive(Debug, Clone, Default)]
pub struct SharedRng {
    inner: Arc<Mutex<SimulationRng>>,
}

impl SharedRng {
    /// Shared generator seeded from OS entropy.
    pub fn new() -> Self {
        Self::from_rng(SimulationRng::new())
    }

    /// Shared deterministic generator.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(SimulationRng::with_seed(seed))
    }

    /// Share an existing generator.
    pub fn from_rng(rng: SimulationRng) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rng)),
        }
    }

    /// Run `f` with exclusive access to the generator.
    pub fn with_rng<F, R>(&self, f: F) -> DiffusionResult<R>
    where
        F: FnOnce(&mut SimulationRng) -> R,
    {
        self.inner
            .lock()
            .map(|mut rng| f(&mut *rng))
            .map_err(|_| DiffusionError::ConcurrencyError {
                resource: "shared_rng".to_string(),
            })
    }

    /// Replace the generator with a freshly seeded one.
    pub fn reseed(&self, seed: u64) -> DiffusionResult<()> {
        self.with_rng(|rng| *rng = SimulationRng::with_seed(seed))
    }
}
