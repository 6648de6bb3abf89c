//! Session timing and retry configuration.

use std::time::Duration;

use crate::error::ConfigError;

/// Time allowed for a realtime subscription to confirm before falling back to
/// polling.
pub const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Client-side timeout for a message insert.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval of the realtime liveness check.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A realtime connection without liveness for this long is considered dead.
pub const DEFAULT_HEARTBEAT_STALE_AFTER: Duration = Duration::from_secs(60);

/// First reconnect delay; doubles per failed attempt.
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(2);

/// Upper bound on the reconnect delay.
pub const DEFAULT_RECONNECT_CAP: Duration = Duration::from_secs(30);

/// Automatic reconnect attempts before waiting for manual recovery.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Outright failures tolerated by `initialize` before polling as last resort.
pub const DEFAULT_MAX_INITIAL_ATTEMPTS: u32 = 3;

/// Polling: message refresh period (every tick).
pub const DEFAULT_POLL_MESSAGES_EVERY: Duration = Duration::from_secs(2);

/// Polling: own presence heartbeat period (every 5th tick).
pub const DEFAULT_POLL_PRESENCE_EVERY: Duration = Duration::from_secs(10);

/// Polling: online user list refresh period (every 15th tick).
pub const DEFAULT_REFRESH_ONLINE_EVERY: Duration = Duration::from_secs(30);

/// Users seen within this window count as online.
pub const DEFAULT_PRESENCE_WINDOW: Duration = Duration::from_secs(180);

/// Local typing burst ends after this much input silence.
pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_secs(2);

/// Remote typing indicators expire after this much silence.
pub const DEFAULT_TYPING_EXPIRY: Duration = Duration::from_secs(2);

/// First send retry delay; doubles per retry (1s, 2s, 4s).
pub const DEFAULT_SEND_RETRY_BASE: Duration = Duration::from_secs(1);

/// Send retries after the first try fails.
pub const DEFAULT_MAX_SEND_RETRIES: u32 = 3;

/// Delay between retiring a channel and unsubscribing it.
pub const DEFAULT_CHANNEL_RELEASE_DELAY: Duration = Duration::from_millis(100);

/// Messages loaded by the initial fetch.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Realtime subscription confirmation deadline
    pub subscribe_timeout: Duration,
    /// Message insert deadline
    pub send_timeout: Duration,
    /// Realtime liveness check interval (should be < `heartbeat_stale_after`)
    pub heartbeat_interval: Duration,
    /// Liveness age that forces a reconnect
    pub heartbeat_stale_after: Duration,
    /// First reconnect delay
    pub reconnect_base: Duration,
    /// Maximum reconnect delay
    pub reconnect_cap: Duration,
    /// Automatic reconnect budget
    pub max_reconnect_attempts: u32,
    /// Initialize-origin budget before polling as last resort
    pub max_initial_attempts: u32,
    /// Polling message refresh period
    pub poll_messages_every: Duration,
    /// Polling presence heartbeat period
    pub poll_presence_every: Duration,
    /// Polling online list refresh period
    pub refresh_online_every: Duration,
    /// Online recency window
    pub presence_window: Duration,
    /// Local typing idle timeout
    pub typing_idle: Duration,
    /// Remote typing indicator expiry
    pub typing_expiry: Duration,
    /// First send retry delay
    pub send_retry_base: Duration,
    /// Send retries after the first failure
    pub max_send_retries: u32,
    /// Deferral between retiring and unsubscribing a channel
    pub channel_release_delay: Duration,
    /// Initial history size
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_stale_after: DEFAULT_HEARTBEAT_STALE_AFTER,
            reconnect_base: DEFAULT_RECONNECT_BASE,
            reconnect_cap: DEFAULT_RECONNECT_CAP,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            max_initial_attempts: DEFAULT_MAX_INITIAL_ATTEMPTS,
            poll_messages_every: DEFAULT_POLL_MESSAGES_EVERY,
            poll_presence_every: DEFAULT_POLL_PRESENCE_EVERY,
            refresh_online_every: DEFAULT_REFRESH_ONLINE_EVERY,
            presence_window: DEFAULT_PRESENCE_WINDOW,
            typing_idle: DEFAULT_TYPING_IDLE,
            typing_expiry: DEFAULT_TYPING_EXPIRY,
            send_retry_base: DEFAULT_SEND_RETRY_BASE,
            max_send_retries: DEFAULT_MAX_SEND_RETRIES,
            channel_release_delay: DEFAULT_CHANNEL_RELEASE_DELAY,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl SessionConfig {
    /// Check the configuration for combinations the session cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("subscribe_timeout", self.subscribe_timeout),
            ("send_timeout", self.send_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("reconnect_base", self.reconnect_base),
            ("poll_messages_every", self.poll_messages_every),
            ("poll_presence_every", self.poll_presence_every),
            ("refresh_online_every", self.refresh_online_every),
            ("typing_idle", self.typing_idle),
            ("typing_expiry", self.typing_expiry),
        ];
        if let Some((field, _)) = non_zero.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ZeroDuration { field });
        }

        if self.heartbeat_interval >= self.heartbeat_stale_after {
            return Err(ConfigError::HeartbeatTooSlow {
                interval: self.heartbeat_interval,
                stale_after: self.heartbeat_stale_after,
            });
        }

        if self.reconnect_base > self.reconnect_cap {
            return Err(ConfigError::BackoffInverted {
                base: self.reconnect_base,
                cap: self.reconnect_cap,
            });
        }

        if self.max_reconnect_attempts == 0 {
            return Err(ConfigError::EmptyBudget { field: "max_reconnect_attempts" });
        }
        if self.max_initial_attempts == 0 {
            return Err(ConfigError::EmptyBudget { field: "max_initial_attempts" });
        }

        Ok(())
    }

    /// Delay before the next reconnect attempt after `attempts` failures.
    ///
    /// `min(base * 2^attempts, cap)`.
    pub fn reconnect_delay(&self, attempts: u32) -> Duration {
        exponential(self.reconnect_base, attempts).min(self.reconnect_cap)
    }

    /// Delay before retrying a send whose try number `tries` just failed.
    ///
    /// Tries are 1-based, so the first retry waits `send_retry_base`.
    pub fn send_retry_delay(&self, tries: u32) -> Duration {
        exponential(self.send_retry_base, tries.saturating_sub(1))
    }
}

/// `base * 2^exponent`, saturating instead of overflowing.
fn exponential(base: Duration, exponent: u32) -> Duration {
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(SessionConfig::default().validate(), Ok(()));
    }

    #[test]
    fn reconnect_delay_doubles_then_caps() {
        let config = SessionConfig::default();
        let delays: Vec<u128> = (0..7).map(|n| config.reconnect_delay(n).as_millis()).collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000, 30000, 30000]);
    }

    #[test]
    fn reconnect_delay_saturates_for_huge_attempt_counts() {
        let config = SessionConfig::default();
        assert_eq!(config.reconnect_delay(u32::MAX), DEFAULT_RECONNECT_CAP);
    }

    #[test]
    fn send_retry_delays_are_one_two_four_seconds() {
        let config = SessionConfig::default();
        let delays: Vec<u64> = (1..=3).map(|n| config.send_retry_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4]);
    }

    #[test]
    fn slow_heartbeat_is_rejected() {
        let config = SessionConfig {
            heartbeat_interval: Duration::from_secs(60),
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::HeartbeatTooSlow { .. })));
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let config = SessionConfig {
            reconnect_base: Duration::from_secs(60),
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BackoffInverted { .. })));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = SessionConfig { send_timeout: Duration::ZERO, ..SessionConfig::default() };
        assert_eq!(config.validate(), Err(ConfigError::ZeroDuration { field: "send_timeout" }));
    }
}
