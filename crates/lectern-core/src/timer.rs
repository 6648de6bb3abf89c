//! Timer keys.
//!
//! The session never sleeps. It asks the driver to arm a timer under one of
//! these keys and later receives [`crate::SessionEvent::TimerFired`] with the
//! same key. Arming a key that is already armed replaces the old deadline.

use std::fmt;

use crate::{channel::ChannelId, message::SendId};

/// Named timer owned by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Timer {
    /// Realtime subscription must confirm before this fires.
    SubscribeTimeout(ChannelId),
    /// Realtime liveness check.
    Heartbeat,
    /// Polling: refresh messages.
    PollMessages,
    /// Polling: refresh own presence row.
    PollPresence,
    /// Polling: re-read the online user list.
    RefreshOnline,
    /// Backoff before the next connect attempt.
    Reconnect,
    /// Deferred unsubscribe of a retired channel.
    ReleaseChannel(ChannelId),
    /// Message insert must complete before this fires.
    SendTimeout(SendId),
    /// Backoff before retrying a failed send.
    SendRetry(SendId),
    /// Local typing burst idle timeout.
    TypingIdle,
    /// Next remote typing indicator expiry.
    TypingExpiry,
}

impl Timer {
    /// Timers that only run while polling.
    pub const POLLERS: [Timer; 3] = [Timer::PollMessages, Timer::PollPresence, Timer::RefreshOnline];

    /// True for channel release timers, which outlive session teardown.
    pub fn is_release(self) -> bool {
        matches!(self, Self::ReleaseChannel(_))
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SubscribeTimeout(channel) => write!(f, "subscribe-timeout({channel})"),
            Self::Heartbeat => f.write_str("heartbeat"),
            Self::PollMessages => f.write_str("poll-messages"),
            Self::PollPresence => f.write_str("poll-presence"),
            Self::RefreshOnline => f.write_str("refresh-online"),
            Self::Reconnect => f.write_str("reconnect"),
            Self::ReleaseChannel(channel) => write!(f, "release({channel})"),
            Self::SendTimeout(send_id) => write!(f, "send-timeout({send_id})"),
            Self::SendRetry(send_id) => write!(f, "send-retry({send_id})"),
            Self::TypingIdle => f.write_str("typing-idle"),
            Self::TypingExpiry => f.write_str("typing-expiry"),
        }
    }
}
