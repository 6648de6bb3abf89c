//! Connection status of a chat session.
//!
//! ```text
//! ┌──────────────┐ initialize ┌────────────┐  Subscribed  ┌─────────────────────┐
//! │ Disconnected │ ─────────> │ Connecting │ ───────────> │ Connected(Realtime) │
//! └──────────────┘            └────────────┘              └─────────────────────┘
//!        ↑                      │         │                          │
//!        │ offline              │ error,  │ open rejected            │ closed,
//!        │ (any state)          │ timeout │                          │ stale
//!        │                      ↓         ↓                          ↓
//!        │        ┌────────────────────┐ ┌──────────────┐  timer  begin
//!        │        │ Connected(Polling) │ │ Reconnecting │ ──────> attempt
//!        │        └────────────────────┘ └──────────────┘
//!        │                                  │ budget exhausted
//!        │                                  ↓
//!        │        manual reconnect      ┌────────┐
//!        └───────────────────────────── │ Failed │
//!                                       └────────┘
//! ```

use std::fmt;

/// Which delivery mechanism carries new messages while connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// Push delivery over the realtime channel.
    Realtime,
    /// Periodic re-fetch from the row store.
    Polling,
}

/// Overall health of the session.
///
/// A delivery mode only exists while connected, so a mode paired with a
/// disconnected state cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    /// Nothing in flight. Initial state, and the state while offline.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Messages are being delivered.
    Connected {
        /// Active delivery mechanism.
        mode: DeliveryMode,
    },
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
    /// Automatic recovery gave up; waiting for a manual reconnect.
    Failed,
}

impl ConnectionStatus {
    /// Connected in either mode.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Not delivering and not attempting right now.
    pub fn is_disconnected(self) -> bool {
        matches!(self, Self::Disconnected | Self::Reconnecting | Self::Failed)
    }

    /// Delivery mode. `None` unless connected.
    pub fn mode(self) -> Option<DeliveryMode> {
        match self {
            Self::Connected { mode } => Some(mode),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected { mode: DeliveryMode::Realtime } => f.write_str("connected/realtime"),
            Self::Connected { mode: DeliveryMode::Polling } => f.write_str("connected/polling"),
            Self::Reconnecting => f.write_str("reconnecting"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Badge shown next to the chat header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionBadge {
    /// Which of the four badge states to show.
    pub kind: BadgeKind,
    /// Failed reconnect attempts, shown when degraded.
    pub attempts: u32,
}

/// Badge states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeKind {
    /// Realtime delivery.
    Live,
    /// Polling fallback.
    Polling,
    /// Attempt in flight or scheduled.
    Connecting,
    /// Offline or given up.
    Disconnected,
}

impl ConnectionBadge {
    /// Badge for a status and attempt counter.
    pub fn new(status: ConnectionStatus, attempts: u32) -> Self {
        let kind = match status {
            ConnectionStatus::Connected { mode: DeliveryMode::Realtime } => BadgeKind::Live,
            ConnectionStatus::Connected { mode: DeliveryMode::Polling } => BadgeKind::Polling,
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting => BadgeKind::Connecting,
            ConnectionStatus::Disconnected | ConnectionStatus::Failed => BadgeKind::Disconnected,
        };
        Self { kind, attempts }
    }

    /// Badge text, e.g. `Live` or `Connecting… (attempt 3)`.
    pub fn label(&self) -> String {
        let base = match self.kind {
            BadgeKind::Live => "Live",
            BadgeKind::Polling => "Polling",
            BadgeKind::Connecting => "Connecting…",
            BadgeKind::Disconnected => "Disconnected",
        };
        if self.attempts > 0 { format!("{base} (attempt {})", self.attempts) } else { base.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_only_exists_while_connected() {
        assert_eq!(ConnectionStatus::Disconnected.mode(), None);
        assert_eq!(ConnectionStatus::Reconnecting.mode(), None);
        assert_eq!(
            ConnectionStatus::Connected { mode: DeliveryMode::Polling }.mode(),
            Some(DeliveryMode::Polling)
        );
    }

    #[test]
    fn disconnected_family() {
        assert!(ConnectionStatus::Failed.is_disconnected());
        assert!(ConnectionStatus::Reconnecting.is_disconnected());
        assert!(!ConnectionStatus::Connecting.is_disconnected());
    }

    #[test]
    fn badge_annotates_attempts() {
        let badge = ConnectionBadge::new(ConnectionStatus::Reconnecting, 3);
        assert_eq!(badge.label(), "Connecting… (attempt 3)");

        let live = ConnectionBadge::new(ConnectionStatus::Connected { mode: DeliveryMode::Realtime }, 0);
        assert_eq!(live.label(), "Live");
    }
}
