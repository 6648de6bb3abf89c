//! Realtime channel vocabulary.
//!
//! The backend broker is external; these types describe what the session asks
//! of it and what it reports back.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::UserId;

/// Session-local channel identity.
///
/// Allocated monotonically per session. Exactly one channel is current at a
/// time; events tagged with any other ID come from a retired channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

/// Broker-side channel name, unique per session attempt.
///
/// Includes the wall clock so a new attempt never collides with a lingering
/// channel from a previous one.
pub fn channel_name(user_id: UserId, wall_clock_ms: u64) -> String {
    format!("chat:{user_id}:{wall_clock_ms}")
}

/// Lifecycle status reported by the broker for a channel.
///
/// May fire several times, including after the session retired the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Subscription confirmed; events will flow.
    Subscribed,
    /// Broker reported an error for this channel.
    ChannelError(String),
    /// Broker gave up confirming the subscription.
    TimedOut,
    /// Channel closed.
    Closed,
}

/// Event classes registered on every chat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    /// Row inserted into the messages table.
    MessageInserted,
    /// Row changed in the presence table.
    PresenceChanged,
    /// Application broadcast (`typing_start` / `typing_stop`).
    Broadcast,
    /// Broker presence sync.
    PresenceSync,
}

/// Registrations made when a chat channel is opened.
pub const CHAT_EVENT_CLASSES: [EventClass; 4] = [
    EventClass::MessageInserted,
    EventClass::PresenceChanged,
    EventClass::Broadcast,
    EventClass::PresenceSync,
];

/// Application broadcast carried over the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Broadcast {
    /// Sender started a typing burst.
    TypingStart {
        /// Who is typing.
        user_id: UserId,
    },
    /// Sender stopped typing.
    TypingStop {
        /// Who stopped.
        user_id: UserId,
    },
}

impl Broadcast {
    /// Wire event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
        }
    }

    /// Originating user.
    pub fn user_id(&self) -> UserId {
        match self {
            Self::TypingStart { user_id } | Self::TypingStop { user_id } => *user_id,
        }
    }
}
