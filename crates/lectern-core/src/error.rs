//! Error types for the lectern session core.
//!
//! Backend failures are reported to the session as data (inside
//! [`crate::SessionEvent`]), never as panics or propagated errors. The session
//! decides between retrying, falling back and surfacing a notification based on
//! [`BackendError::is_transient`].

use std::time::Duration;

use thiserror::Error;

/// Failure reported by the backend platform (row store or realtime broker).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Network-level failure (connection refused, reset, DNS).
    #[error("network error: {0}")]
    Network(String),

    /// The call did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The backend rejected the request (constraint violation, permission).
    #[error("rejected by backend: {0}")]
    Rejected(String),

    /// The backend is reachable but not serving this feature right now.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Rejections are never transient: resending the same record produces the
    /// same constraint violation.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Invalid [`crate::SessionConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A duration that must be non-zero is zero.
    #[error("{field} must be greater than zero")]
    ZeroDuration {
        /// Name of the offending field
        field: &'static str,
    },

    /// Heartbeat checks must run more often than the staleness threshold.
    #[error("heartbeat interval {interval:?} must be shorter than stale threshold {stale_after:?}")]
    HeartbeatTooSlow {
        /// Configured heartbeat interval
        interval: Duration,
        /// Configured staleness threshold
        stale_after: Duration,
    },

    /// Backoff base delay exceeds the cap.
    #[error("reconnect base delay {base:?} exceeds cap {cap:?}")]
    BackoffInverted {
        /// Configured base delay
        base: Duration,
        /// Configured cap
        cap: Duration,
    },

    /// A retry budget of zero attempts.
    #[error("{field} must allow at least one attempt")]
    EmptyBudget {
        /// Name of the offending field
        field: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_failures_are_transient() {
        assert!(BackendError::Network("reset".into()).is_transient());
        assert!(BackendError::Timeout(Duration::from_secs(10)).is_transient());
        assert!(BackendError::Unavailable("realtime disabled".into()).is_transient());
    }

    #[test]
    fn rejections_are_terminal() {
        assert!(!BackendError::Rejected("content too long".into()).is_transient());
    }
}
