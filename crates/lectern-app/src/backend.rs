//! Backend abstraction consumed by the runtime.
//!
//! The chat backend is an external platform offering a row store (messages and
//! presence) and a realtime broker (named channels carrying row changes,
//! broadcasts and presence syncs). The [`crate::Runtime`] only talks to it
//! through these traits, so the same orchestration runs against the
//! in-process [`crate::MemoryBackend`] and a real service adapter.

use std::future::Future;

use lectern_core::{
    BackendError, Broadcast, ChannelId, ChannelStatus, NewMessage, PresenceEntry, SessionEvent,
    StoredMessage, UserId,
};
use tokio::sync::mpsc;

/// Row-level access to the messages and presence collections.
pub trait RowStore: Clone + Send + Sync + 'static {
    /// Messages created at or after `since_ms` (all if `None`): the newest
    /// `limit`, oldest first.
    fn select_messages(
        &self,
        since_ms: Option<u64>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<StoredMessage>, BackendError>> + Send;

    /// Presence rows seen at or after `active_since_ms`.
    fn select_presence(
        &self,
        active_since_ms: u64,
    ) -> impl Future<Output = Result<Vec<PresenceEntry>, BackendError>> + Send;

    /// Insert a message and return the stored row.
    fn insert_message(
        &self,
        message: NewMessage,
    ) -> impl Future<Output = Result<StoredMessage, BackendError>> + Send;

    /// Upsert the user's presence row.
    fn touch_presence(
        &self,
        user_id: UserId,
        last_seen_ms: u64,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Realtime broker.
pub trait Realtime: Clone + Send + Sync + 'static {
    /// Handle to an open channel.
    type Channel: RealtimeChannel;

    /// Open a channel named `name` with every chat event class registered.
    ///
    /// Returning `Ok` means the channel exists, not that it is subscribed:
    /// confirmation and later lifecycle changes arrive through `sink` as
    /// [`ChannelEvent::Status`].
    ///
    /// # Errors
    ///
    /// Returns an error if the broker refuses to open the channel at all.
    fn subscribe(
        &self,
        name: &str,
        sink: ChannelSink,
    ) -> impl Future<Output = Result<Self::Channel, BackendError>> + Send;
}

/// Open realtime channel.
pub trait RealtimeChannel: Clone + Send + Sync + 'static {
    /// Broadcast to the other subscribers of this channel.
    fn send(&self, broadcast: Broadcast) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Close the channel. The broker reports [`ChannelStatus::Closed`].
    fn unsubscribe(&self) -> impl Future<Output = ()> + Send;
}

/// Callback delivered by the broker for an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Lifecycle change.
    Status(ChannelStatus),
    /// Row inserted into the messages table.
    MessageInserted(StoredMessage),
    /// Row changed in the presence table.
    PresenceChanged(PresenceEntry),
    /// Application broadcast from another subscriber.
    Broadcast(Broadcast),
    /// Broker presence sync.
    PresenceSync,
}

/// Where a channel delivers its callbacks.
///
/// Tags every event with the channel it belongs to, so the session can tell a
/// retired channel's late callbacks from the current channel's.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    channel: ChannelId,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    /// Create a sink for `channel`.
    pub fn new(channel: ChannelId, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { channel, events }
    }

    /// Channel this sink belongs to.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Deliver a callback. Returns `false` once the runtime is gone.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        let channel = self.channel;
        let event = match event {
            ChannelEvent::Status(status) => SessionEvent::ChannelStatus { channel, status },
            ChannelEvent::MessageInserted(message) => {
                SessionEvent::MessageInserted { channel, message }
            },
            ChannelEvent::PresenceChanged(entry) => SessionEvent::PresenceChanged { channel, entry },
            ChannelEvent::Broadcast(broadcast) => SessionEvent::Broadcast { channel, broadcast },
            ChannelEvent::PresenceSync => SessionEvent::PresenceSync { channel },
        };
        self.events.send(event).is_ok()
    }

    /// Whether the receiving runtime has stopped.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}
