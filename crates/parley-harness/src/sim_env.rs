//! Simulated environment with a manually advanced clock.

use std::{
    ops::Sub,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parley_core::env::Environment;

/// Virtual instant: time elapsed since the simulation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Elapsed time since the start of the simulation.
    pub fn elapsed(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

/// Deterministic environment.
///
/// Time only moves when [`SimEnv::advance`] is called. Clones share the same
/// clock.
#[derive(Debug, Clone)]
pub struct SimEnv {
    elapsed_micros: Arc<AtomicU64>,
    epoch_secs: u64,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Wall clock at simulation start (2024-01-01T00:00:00Z).
    pub const EPOCH_SECS: u64 = 1_704_067_200;

    /// Create a clock at time zero.
    pub fn new() -> Self {
        Self { elapsed_micros: Arc::new(AtomicU64::new(0)), epoch_secs: Self::EPOCH_SECS }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let micros = u64::try_from(by.as_micros()).unwrap_or(u64::MAX);
        self.elapsed_micros.fetch_add(micros, Ordering::SeqCst);
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(Duration::from_micros(self.elapsed_micros.load(Ordering::SeqCst)))
    }

    fn wall_clock_secs(&self) -> u64 {
        self.epoch_secs + self.now().elapsed().as_secs()
    }
}
