//! Virtual-time environment.
//!
//! `SimEnv` owns a shared virtual clock. Time only moves when the driver
//! advances it, so every timer deadline is hit exactly and runs are
//! reproducible.

use std::{
    ops::{Add, Sub},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use lectern_core::Environment;

/// Wall clock reading at virtual time zero (2023-11-14T22:13:20Z).
pub const SIM_EPOCH_MS: u64 = 1_700_000_000_000;

/// Instant on the virtual clock, measured from the start of the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Time since the start of the simulation.
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

impl Add<Duration> for SimInstant {
    type Output = SimInstant;

    fn add(self, rhs: Duration) -> SimInstant {
        SimInstant(self.0 + rhs)
    }
}

/// Simulated environment with a shared virtual clock.
///
/// Clones share the clock.
#[derive(Debug, Clone, Default)]
pub struct SimEnv {
    /// Nanoseconds since the start of the simulation.
    elapsed_nanos: Arc<AtomicU64>,
}

impl SimEnv {
    /// Create an environment at virtual time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.elapsed_nanos.fetch_add(to_nanos(by), Ordering::SeqCst);
    }

    /// Move the clock to `to`. Never moves backwards.
    pub fn advance_to(&self, to: SimInstant) {
        self.elapsed_nanos.fetch_max(to_nanos(to.0), Ordering::SeqCst);
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst)))
    }

    fn wall_clock_ms(&self) -> u64 {
        SIM_EPOCH_MS + self.elapsed_nanos.load(Ordering::SeqCst) / 1_000_000
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }
}

fn to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
