#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

//! In-process chat backend.
//!
//! Implements both the row store and the realtime broker in memory, with
//! fan-out to every open channel. Several runtimes can share one backend
//! (clones share state), which is how the terminal client runs a demo
//! classmate next to the user.

use std::{
    collections::{BTreeMap, HashMap},
    future::{Future, ready},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use lectern_core::{
    Author, BackendError, Broadcast, ChannelStatus, Environment, NewMessage, PresenceEntry,
    StoredMessage, UserId,
};
use tracing::debug;

use crate::backend::{ChannelEvent, ChannelSink, Realtime, RealtimeChannel, RowStore};

/// Shared in-memory backend.
#[derive(Clone)]
pub struct MemoryBackend<E: Environment> {
    env: E,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    messages: Vec<StoredMessage>,
    next_row: u64,
    presence: HashMap<UserId, u64>,
    authors: HashMap<UserId, Author>,
    /// Open channels by subscription ID.
    channels: BTreeMap<u64, Subscription>,
    next_subscription: u64,
    unavailable: bool,
    realtime_disabled: bool,
}

struct Subscription {
    name: String,
    sink: ChannelSink,
}

impl Inner {
    /// Deliver to every open channel except `skip`. Drops channels whose
    /// runtime is gone.
    fn fan_out(&mut self, skip: Option<u64>, event: &ChannelEvent) {
        self.channels.retain(|id, sub| Some(*id) == skip || sub.sink.emit(event.clone()));
    }
}

impl<E: Environment> MemoryBackend<E> {
    /// Create an empty backend. Row timestamps come from `env`'s wall clock.
    pub fn new(env: E) -> Self {
        Self { env, inner: Arc::new(Mutex::new(Inner::default())) }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register display information attached to a user's rows.
    pub fn register_author(&self, user_id: UserId, author: Author) {
        self.lock().authors.insert(user_id, author);
    }

    /// Make every call fail as if the service were unreachable.
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Refuse realtime subscriptions with a channel error.
    pub fn set_realtime(&self, enabled: bool) {
        self.lock().realtime_disabled = !enabled;
    }

    /// Close every open channel from the broker side.
    pub fn drop_channels(&self) {
        let mut inner = self.lock();
        for (id, sub) in std::mem::take(&mut inner.channels) {
            debug!(subscription = id, name = %sub.name, "broker dropped channel");
            sub.sink.emit(ChannelEvent::Status(ChannelStatus::Closed));
        }
    }

    /// Broadcast on behalf of a participant without a channel of its own.
    pub fn broadcast_as(&self, broadcast: Broadcast) {
        self.lock().fan_out(None, &ChannelEvent::Broadcast(broadcast));
    }

    /// Stored message rows, in insertion order.
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.lock().messages.clone()
    }

    /// Names of open channels.
    pub fn open_channels(&self) -> Vec<String> {
        self.lock().channels.values().map(|sub| sub.name.clone()).collect()
    }

    /// Last presence refresh of a user.
    pub fn last_seen(&self, user_id: UserId) -> Option<u64> {
        self.lock().presence.get(&user_id).copied()
    }

    fn check_available(inner: &Inner) -> Result<(), BackendError> {
        if inner.unavailable {
            return Err(BackendError::Network("backend unreachable".into()));
        }
        Ok(())
    }

    fn select_messages_now(
        &self,
        since_ms: Option<u64>,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, BackendError> {
        let inner = self.lock();
        Self::check_available(&inner)?;

        let matching: Vec<&StoredMessage> = inner
            .messages
            .iter()
            .filter(|m| since_ms.is_none_or(|since| m.created_at_ms >= since))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }

    fn select_presence_now(&self, active_since_ms: u64) -> Result<Vec<PresenceEntry>, BackendError> {
        let inner = self.lock();
        Self::check_available(&inner)?;

        Ok(inner
            .presence
            .iter()
            .filter(|(_, seen)| **seen >= active_since_ms)
            .map(|(user_id, seen)| PresenceEntry { user_id: *user_id, last_seen_ms: *seen })
            .collect())
    }

    fn insert_message_now(&self, message: NewMessage) -> Result<StoredMessage, BackendError> {
        let mut inner = self.lock();
        Self::check_available(&inner)?;
        if message.content.trim().is_empty() {
            return Err(BackendError::Rejected("content must not be blank".into()));
        }

        inner.next_row += 1;
        let row = StoredMessage {
            id: inner.next_row,
            created_at_ms: self.env.wall_clock_ms(),
            author: inner.authors.get(&message.user_id).cloned(),
            user_id: message.user_id,
            content: message.content,
        };
        inner.messages.push(row.clone());
        inner.fan_out(None, &ChannelEvent::MessageInserted(row.clone()));
        Ok(row)
    }

    fn touch_presence_now(&self, user_id: UserId, last_seen_ms: u64) -> Result<(), BackendError> {
        let mut inner = self.lock();
        Self::check_available(&inner)?;

        let seen = inner.presence.entry(user_id).or_insert(last_seen_ms);
        *seen = (*seen).max(last_seen_ms);
        let entry = PresenceEntry { user_id, last_seen_ms: *seen };
        inner.fan_out(None, &ChannelEvent::PresenceChanged(entry));
        Ok(())
    }

    fn subscribe_now(&self, name: &str, sink: ChannelSink) -> Result<MemoryChannel<E>, BackendError> {
        let mut inner = self.lock();
        Self::check_available(&inner)?;

        inner.next_subscription += 1;
        let id = inner.next_subscription;
        if inner.realtime_disabled {
            sink.emit(ChannelEvent::Status(ChannelStatus::ChannelError(
                "realtime is disabled".into(),
            )));
            return Ok(MemoryChannel { backend: self.clone(), id });
        }

        debug!(subscription = id, %name, "channel subscribed");
        sink.emit(ChannelEvent::Status(ChannelStatus::Subscribed));
        inner.fan_out(None, &ChannelEvent::PresenceSync);
        inner.channels.insert(id, Subscription { name: name.to_owned(), sink });
        Ok(MemoryChannel { backend: self.clone(), id })
    }
}

impl<E: Environment> RowStore for MemoryBackend<E> {
    fn select_messages(
        &self,
        since_ms: Option<u64>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<StoredMessage>, BackendError>> + Send {
        ready(self.select_messages_now(since_ms, limit))
    }

    fn select_presence(
        &self,
        active_since_ms: u64,
    ) -> impl Future<Output = Result<Vec<PresenceEntry>, BackendError>> + Send {
        ready(self.select_presence_now(active_since_ms))
    }

    fn insert_message(
        &self,
        message: NewMessage,
    ) -> impl Future<Output = Result<StoredMessage, BackendError>> + Send {
        ready(self.insert_message_now(message))
    }

    fn touch_presence(
        &self,
        user_id: UserId,
        last_seen_ms: u64,
    ) -> impl Future<Output = Result<(), BackendError>> + Send {
        ready(self.touch_presence_now(user_id, last_seen_ms))
    }
}

impl<E: Environment> Realtime for MemoryBackend<E> {
    type Channel = MemoryChannel<E>;

    fn subscribe(
        &self,
        name: &str,
        sink: ChannelSink,
    ) -> impl Future<Output = Result<Self::Channel, BackendError>> + Send {
        ready(self.subscribe_now(name, sink))
    }
}

/// Channel handle of the [`MemoryBackend`].
#[derive(Clone)]
pub struct MemoryChannel<E: Environment> {
    backend: MemoryBackend<E>,
    id: u64,
}

impl<E: Environment> RealtimeChannel for MemoryChannel<E> {
    fn send(&self, broadcast: Broadcast) -> impl Future<Output = Result<(), BackendError>> + Send {
        let mut inner = self.backend.lock();
        let result = Self::check_open(&inner, self.id).map(|()| {
            inner.fan_out(Some(self.id), &ChannelEvent::Broadcast(broadcast));
        });
        ready(result)
    }

    fn unsubscribe(&self) -> impl Future<Output = ()> + Send {
        if let Some(sub) = self.backend.lock().channels.remove(&self.id) {
            debug!(subscription = self.id, name = %sub.name, "channel unsubscribed");
            sub.sink.emit(ChannelEvent::Status(ChannelStatus::Closed));
        }
        ready(())
    }
}

impl<E: Environment> MemoryChannel<E> {
    fn check_open(inner: &Inner, id: u64) -> Result<(), BackendError> {
        if inner.unavailable {
            return Err(BackendError::Network("backend unreachable".into()));
        }
        if !inner.channels.contains_key(&id) {
            return Err(BackendError::Unavailable("channel is closed".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lectern_core::{ChannelId, SessionEvent};
    use tokio::sync::mpsc;

    use super::*;
    use crate::SystemEnv;

    fn sink(channel: u64) -> (ChannelSink, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSink::new(ChannelId(channel), tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_confirms_and_fans_out_inserts() {
        let backend = MemoryBackend::new(SystemEnv::anchored_at(5_000));
        let (sink, mut rx) = sink(1);
        let _channel = backend.subscribe("chat:a", sink).await.unwrap();

        let row = backend
            .insert_message(NewMessage { user_id: UserId(2), content: "hi".into() })
            .await
            .unwrap();
        assert_eq!(row.id, 1);
        assert_eq!(row.created_at_ms, 5_000);

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                SessionEvent::ChannelStatus {
                    channel: ChannelId(1),
                    status: ChannelStatus::Subscribed
                },
                SessionEvent::MessageInserted { channel: ChannelId(1), message: row },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn broadcasts_skip_the_sender() {
        let backend = MemoryBackend::new(SystemEnv::anchored_at(0));
        let (sink_a, mut rx_a) = sink(1);
        let (sink_b, mut rx_b) = sink(2);
        let channel_a = backend.subscribe("a", sink_a).await.unwrap();
        let _channel_b = backend.subscribe("b", sink_b).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let typing = Broadcast::TypingStart { user_id: UserId(1) };
        channel_a.send(typing).await.unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![SessionEvent::Broadcast { channel: ChannelId(2), broadcast: typing }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_reports_closed_once() {
        let backend = MemoryBackend::new(SystemEnv::anchored_at(0));
        let (sink, mut rx) = sink(1);
        let channel = backend.subscribe("a", sink).await.unwrap();
        drain(&mut rx);

        channel.unsubscribe().await;
        channel.unsubscribe().await;

        assert_eq!(
            drain(&mut rx),
            vec![SessionEvent::ChannelStatus { channel: ChannelId(1), status: ChannelStatus::Closed }]
        );
        assert!(channel.send(Broadcast::TypingStop { user_id: UserId(1) }).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_realtime_reports_channel_error() {
        let backend = MemoryBackend::new(SystemEnv::anchored_at(0));
        backend.set_realtime(false);
        let (sink, mut rx) = sink(1);
        backend.subscribe("a", sink).await.unwrap();

        assert!(matches!(
            drain(&mut rx).as_slice(),
            [SessionEvent::ChannelStatus { status: ChannelStatus::ChannelError(_), .. }]
        ));
        assert!(backend.open_channels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_backend_fails_every_call() {
        let backend = MemoryBackend::new(SystemEnv::anchored_at(0));
        backend.set_available(false);
        let (sink, _rx) = sink(1);

        assert!(backend.subscribe("a", sink).await.is_err());
        assert!(backend.select_messages(None, 10).await.is_err());
        assert!(backend.touch_presence(UserId(1), 0).await.is_err());
        let insert = backend.insert_message(NewMessage { user_id: UserId(1), content: "x".into() });
        assert!(insert.await.unwrap_err().is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn select_returns_newest_rows_in_order() {
        let backend = MemoryBackend::new(SystemEnv::anchored_at(0));
        for n in 0..5 {
            let message = NewMessage { user_id: UserId(1), content: format!("m{n}") };
            backend.insert_message(message).await.unwrap();
        }

        let rows = backend.select_messages(None, 2).await.unwrap();
        let contents: Vec<_> = rows.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_insert_is_rejected() {
        let backend = MemoryBackend::new(SystemEnv::anchored_at(0));
        let insert = backend.insert_message(NewMessage { user_id: UserId(1), content: " ".into() });
        assert!(!insert.await.unwrap_err().is_transient());
    }
}
