//! Session events and actions.

use std::time::Duration;

use crate::{
    channel::{Broadcast, ChannelId, ChannelStatus},
    error::BackendError,
    identity::UserId,
    message::{NewMessage, SendId, StoredMessage},
    presence::PresenceEntry,
    timer::Timer,
};

/// Events the driver feeds into the session.
///
/// The driver is responsible for:
/// - Forwarding broker callbacks, tagged with the channel they came from
/// - Reporting completion of every row store call the session requested
/// - Firing armed timers
/// - Reporting network connectivity changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Broker lifecycle callback for a channel.
    ChannelStatus {
        /// Channel the callback belongs to.
        channel: ChannelId,
        /// Reported status.
        status: ChannelStatus,
    },

    /// The broker refused to open a channel at all.
    ChannelOpenFailed {
        /// Channel that failed to open.
        channel: ChannelId,
        /// Failure reason.
        error: BackendError,
    },

    /// A message row was inserted (realtime delivery).
    MessageInserted {
        /// Channel that delivered the row.
        channel: ChannelId,
        /// The inserted row.
        message: StoredMessage,
    },

    /// A presence row changed (realtime delivery).
    PresenceChanged {
        /// Channel that delivered the change.
        channel: ChannelId,
        /// The updated row.
        entry: PresenceEntry,
    },

    /// Application broadcast from another participant.
    Broadcast {
        /// Channel that delivered the broadcast.
        channel: ChannelId,
        /// Broadcast payload.
        broadcast: Broadcast,
    },

    /// Broker presence sync; the online list should be re-read.
    PresenceSync {
        /// Channel that delivered the sync.
        channel: ChannelId,
    },

    /// Result of [`SessionAction::FetchMessages`].
    MessagesFetched {
        /// Fetched rows, or the failure.
        result: Result<Vec<StoredMessage>, BackendError>,
    },

    /// Result of [`SessionAction::FetchPresence`].
    PresenceFetched {
        /// Presence rows inside the window, or the failure.
        result: Result<Vec<PresenceEntry>, BackendError>,
    },

    /// Result of [`SessionAction::TouchPresence`].
    PresenceTouched {
        /// Upsert outcome.
        result: Result<(), BackendError>,
    },

    /// Result of [`SessionAction::InsertMessage`].
    InsertCompleted {
        /// Outgoing message the insert belongs to.
        send_id: SendId,
        /// Dispatch attempt (1 for the first try).
        attempt: u32,
        /// Stored row, or the failure.
        result: Result<StoredMessage, BackendError>,
    },

    /// A timer armed via [`SessionAction::SetTimer`] elapsed.
    TimerFired(Timer),

    /// The device regained network connectivity.
    NetworkOnline,

    /// The device lost network connectivity.
    NetworkOffline,
}

/// User-visible notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A message could not be delivered after all retries.
    SendFailed {
        /// Content of the dropped message.
        content: String,
    },
}

/// Actions the session produces for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open a realtime channel and register the chat event classes on it.
    ///
    /// Every callback for this channel must be reported tagged with `channel`.
    OpenChannel {
        /// Session-local identity of the new channel.
        channel: ChannelId,
        /// Broker-side name.
        name: String,
    },

    /// Unsubscribe a retired channel. Errors are ignored.
    ReleaseChannel {
        /// Channel to unsubscribe.
        channel: ChannelId,
    },

    /// Read messages ordered by creation time, report
    /// [`SessionEvent::MessagesFetched`].
    FetchMessages {
        /// Only rows created at or after this timestamp. `None` for history.
        since_ms: Option<u64>,
        /// Maximum number of rows.
        limit: usize,
    },

    /// Read presence rows seen at or after a timestamp, report
    /// [`SessionEvent::PresenceFetched`].
    FetchPresence {
        /// Start of the recency window (ms since the Unix epoch).
        active_since_ms: u64,
    },

    /// Upsert our presence row, report [`SessionEvent::PresenceTouched`].
    TouchPresence {
        /// Our user ID.
        user_id: UserId,
        /// Timestamp to record.
        last_seen_ms: u64,
    },

    /// Insert a message row, report [`SessionEvent::InsertCompleted`].
    InsertMessage {
        /// Outgoing message identity.
        send_id: SendId,
        /// Dispatch attempt, echoed back in the completion.
        attempt: u32,
        /// Row to insert.
        message: NewMessage,
    },

    /// Send an application broadcast on a realtime channel.
    Broadcast {
        /// Channel to send on.
        channel: ChannelId,
        /// Payload.
        broadcast: Broadcast,
    },

    /// Arm a timer, replacing any armed timer with the same key.
    SetTimer {
        /// Timer key.
        timer: Timer,
        /// Delay from now.
        after: Duration,
    },

    /// Disarm a timer. A no-op if it is not armed.
    CancelTimer {
        /// Timer key.
        timer: Timer,
    },

    /// Surface a notification to the user.
    Notify(Notification),

    /// Observable state changed; redraw.
    Render,
}
