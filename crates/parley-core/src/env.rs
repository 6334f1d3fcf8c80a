//! Environment abstraction for deterministic testing.
//!
//! Decouples orchestration logic from the system clock. Production uses real
//! time; simulation uses a manually advanced clock so that error expiry and
//! notice timestamps are reproducible.

use std::time::Duration;

/// Abstract environment providing time.
///
/// # Invariants
///
/// Implementations MUST guarantee that `now()` never goes backwards.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments use a virtual instant.
    type Instant: Copy + Ord + Send + Sync + std::fmt::Debug + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Wall clock time in seconds since the Unix epoch.
    ///
    /// Used only for presentation timestamps (system notices). Never use it
    /// for expiry decisions, which must go through [`Environment::now`].
    fn wall_clock_secs(&self) -> u64;

    /// Wall clock as a signed chat timestamp.
    fn timestamp(&self) -> i64 {
        i64::try_from(self.wall_clock_secs()).unwrap_or(i64::MAX)
    }
}
