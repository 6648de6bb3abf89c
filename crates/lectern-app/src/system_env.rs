//! Production environment backed by the tokio clock.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lectern_core::Environment;
use tokio::time::Instant;

/// Environment using the tokio clock.
///
/// The wall clock is anchored to the system clock once, at construction, and
/// advances with the tokio clock afterwards. It never jumps backwards when the
/// system clock is adjusted, and it follows paused time in tests.
#[derive(Debug, Clone, Copy)]
pub struct SystemEnv {
    anchor: Instant,
    anchor_wall_ms: u64,
}

impl SystemEnv {
    /// Create an environment anchored at the current system time.
    ///
    /// Must be called inside a tokio runtime with the time driver enabled.
    #[must_use]
    pub fn new() -> Self {
        let anchor_wall_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| u64::try_from(since.as_millis()).unwrap_or(u64::MAX));
        Self::anchored_at(anchor_wall_ms)
    }

    /// Create an environment whose wall clock reads `wall_ms` right now.
    #[must_use]
    pub fn anchored_at(wall_ms: u64) -> Self {
        Self { anchor: Instant::now(), anchor_wall_ms: wall_ms }
    }
}

impl Default for SystemEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SystemEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn wall_clock_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.anchor_wall_ms.saturating_add(elapsed)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn wall_clock_follows_tokio_clock() {
        let env = SystemEnv::anchored_at(1_000);
        assert_eq!(env.wall_clock_ms(), 1_000);

        env.sleep(Duration::from_millis(2_500)).await;
        assert_eq!(env.wall_clock_ms(), 3_500);
    }

    #[tokio::test(start_paused = true)]
    async fn now_is_monotonic() {
        let env = SystemEnv::new();
        let before = env.now();
        env.sleep(Duration::from_secs(1)).await;
        assert!(env.now() - before >= Duration::from_secs(1));
    }
}
