//! Environment abstraction for deterministic testing.
//!
//! Decouples session logic from system resources (monotonic time, wall clock).
//! Enables deterministic simulation with a virtual clock and production use
//! with real system time.

use std::{future::Future, ops::Sub, time::Duration};

/// Abstract environment providing time and async sleeping.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `wall_clock_ms()` is milliseconds since the Unix epoch, comparable with
///   the timestamps the backend stores on rows
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use the tokio clock, while simulation
    /// environments use virtual time.
    type Instant: Copy + Ord + Send + Sync + Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Current wall clock time in milliseconds since the Unix epoch.
    ///
    /// Used for presence recency windows, channel names and optimistic
    /// message timestamps. Never used for timeouts.
    fn wall_clock_ms(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be used
    /// by driver code (not session logic).
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}
