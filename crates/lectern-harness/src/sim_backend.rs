//! Scripted in-memory backend.
//!
//! `SimBackend` plays both the row store and the realtime broker. It answers
//! every session action synchronously with the events the real platform would
//! eventually deliver, and records every request for assertions. Behavior is
//! scripted per call: the next channel open and the next message inserts take
//! their behavior from a queue, falling back to a default.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use arbitrary::Arbitrary;
use lectern_core::{
    BackendError, Broadcast, ChannelId, ChannelStatus, NewMessage, PresenceEntry, SendId,
    SessionEvent, StoredMessage, UserId,
};

use crate::chaos::{Chaos, ChaosConfig, ChaosTarget};

/// What the broker does with the next channel open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum ChannelBehavior {
    /// Confirm the subscription immediately.
    Subscribe,
    /// Report a channel error before confirming.
    Error,
    /// Never report anything.
    Silent,
    /// Refuse to open the channel at all.
    Reject,
}

/// What the row store does with the next message insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum InsertBehavior {
    /// Store the row, acknowledge, then fan the row out.
    Succeed,
    /// Store the row and fan it out before acknowledging.
    EchoFirst,
    /// Fail with a transient network error.
    Fail,
    /// Fail with a rejection.
    Reject,
    /// Store the row but hold the acknowledgement until released.
    Hang,
}

/// Insert whose acknowledgement is being held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HungInsert {
    /// Outgoing message.
    pub send_id: SendId,
    /// Dispatch attempt.
    pub attempt: u32,
    /// Stored row.
    pub row: StoredMessage,
}

/// In-memory backend with scripted failures.
#[derive(Debug, Clone)]
pub struct SimBackend {
    messages: Vec<StoredMessage>,
    presence: BTreeMap<UserId, u64>,
    next_row_id: u64,
    subscribed: BTreeSet<ChannelId>,
    channel_script: VecDeque<ChannelBehavior>,
    default_channel: ChannelBehavior,
    insert_script: VecDeque<InsertBehavior>,
    default_insert: InsertBehavior,
    fail_fetches: bool,
    fail_touches: bool,
    chaos: Option<Chaos>,
    hung: Vec<HungInsert>,
    opened: Vec<(ChannelId, String)>,
    released: Vec<ChannelId>,
    broadcasts: Vec<(ChannelId, Broadcast)>,
    inserts: Vec<(SendId, u32, NewMessage)>,
    fetches: usize,
    presence_reads: usize,
    touches: usize,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBackend {
    /// Empty backend that subscribes and stores everything successfully.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            presence: BTreeMap::new(),
            next_row_id: 1,
            subscribed: BTreeSet::new(),
            channel_script: VecDeque::new(),
            default_channel: ChannelBehavior::Subscribe,
            insert_script: VecDeque::new(),
            default_insert: InsertBehavior::Succeed,
            fail_fetches: false,
            fail_touches: false,
            chaos: None,
            hung: Vec::new(),
            opened: Vec::new(),
            released: Vec::new(),
            broadcasts: Vec::new(),
            inserts: Vec::new(),
            fetches: 0,
            presence_reads: 0,
            touches: 0,
        }
    }

    /// Queue behavior for upcoming channel opens.
    pub fn script_channels(&mut self, behaviors: impl IntoIterator<Item = ChannelBehavior>) {
        self.channel_script.extend(behaviors);
    }

    /// Behavior once the channel script is exhausted.
    pub fn set_default_channel(&mut self, behavior: ChannelBehavior) {
        self.default_channel = behavior;
    }

    /// Queue behavior for upcoming message inserts.
    pub fn script_inserts(&mut self, behaviors: impl IntoIterator<Item = InsertBehavior>) {
        self.insert_script.extend(behaviors);
    }

    /// Drop every queued channel and insert behavior.
    pub fn clear_scripts(&mut self) {
        self.channel_script.clear();
        self.insert_script.clear();
    }

    /// Behavior once the insert script is exhausted.
    pub fn set_default_insert(&mut self, behavior: InsertBehavior) {
        self.default_insert = behavior;
    }

    /// Make every message and presence read fail.
    pub fn set_fail_fetches(&mut self, fail: bool) {
        self.fail_fetches = fail;
    }

    /// Make every presence upsert fail.
    pub fn set_fail_touches(&mut self, fail: bool) {
        self.fail_touches = fail;
    }

    /// Enable seeded random failures on top of the script.
    pub fn set_chaos(&mut self, config: ChaosConfig) {
        self.chaos = Some(Chaos::new(config));
    }

    /// Failures injected by chaos so far.
    pub fn chaos_injected(&self) -> u64 {
        self.chaos.as_ref().map_or(0, Chaos::injected)
    }

    /// Open a channel. Returns the broker callbacks it produces.
    pub fn open_channel(&mut self, channel: ChannelId, name: String) -> Vec<SessionEvent> {
        self.opened.push((channel, name));
        let mut behavior = self.channel_script.pop_front().unwrap_or(self.default_channel);
        if self.chaos_fails(ChaosTarget::Open) {
            behavior = ChannelBehavior::Reject;
        } else if self.chaos_fails(ChaosTarget::Silence) {
            behavior = ChannelBehavior::Silent;
        }

        match behavior {
            ChannelBehavior::Subscribe => {
                self.subscribed.insert(channel);
                vec![SessionEvent::ChannelStatus { channel, status: ChannelStatus::Subscribed }]
            },
            ChannelBehavior::Error => vec![SessionEvent::ChannelStatus {
                channel,
                status: ChannelStatus::ChannelError("subscription refused".into()),
            }],
            ChannelBehavior::Silent => Vec::new(),
            ChannelBehavior::Reject => vec![SessionEvent::ChannelOpenFailed {
                channel,
                error: BackendError::Network("connection refused".into()),
            }],
        }
    }

    /// Unsubscribe a channel. The broker reports `Closed` for it afterwards.
    pub fn release_channel(&mut self, channel: ChannelId) -> Vec<SessionEvent> {
        self.released.push(channel);
        self.subscribed.remove(&channel);
        vec![SessionEvent::ChannelStatus { channel, status: ChannelStatus::Closed }]
    }

    /// Close a subscribed channel from the broker side.
    pub fn drop_channel(&mut self, channel: ChannelId) -> Vec<SessionEvent> {
        if !self.subscribed.remove(&channel) {
            return Vec::new();
        }
        vec![SessionEvent::ChannelStatus { channel, status: ChannelStatus::Closed }]
    }

    /// Read messages at or after `since_ms`: the newest `limit`, oldest first.
    pub fn select_messages(
        &mut self,
        since_ms: Option<u64>,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, BackendError> {
        self.fetches += 1;
        if self.fail_fetches || self.chaos_fails(ChaosTarget::Fetch) {
            return Err(BackendError::Network("read failed".into()));
        }

        let matching: Vec<StoredMessage> = self
            .messages
            .iter()
            .filter(|m| since_ms.is_none_or(|since| m.created_at_ms >= since))
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).collect())
    }

    /// Read presence rows seen at or after `active_since_ms`.
    pub fn select_presence(
        &mut self,
        active_since_ms: u64,
    ) -> Result<Vec<PresenceEntry>, BackendError> {
        self.presence_reads += 1;
        if self.fail_fetches || self.chaos_fails(ChaosTarget::Fetch) {
            return Err(BackendError::Network("read failed".into()));
        }

        Ok(self
            .presence
            .iter()
            .filter(|(_, seen)| **seen >= active_since_ms)
            .map(|(user_id, seen)| PresenceEntry { user_id: *user_id, last_seen_ms: *seen })
            .collect())
    }

    /// Upsert a presence row. Returns the completion plus row-change fan-out.
    pub fn touch_presence(&mut self, user_id: UserId, last_seen_ms: u64) -> Vec<SessionEvent> {
        self.touches += 1;
        if self.fail_touches || self.chaos_fails(ChaosTarget::Touch) {
            return vec![SessionEvent::PresenceTouched {
                result: Err(BackendError::Timeout(std::time::Duration::from_secs(5))),
            }];
        }

        self.presence.insert(user_id, last_seen_ms);
        let entry = PresenceEntry { user_id, last_seen_ms };
        let mut events = vec![SessionEvent::PresenceTouched { result: Ok(()) }];
        events.extend(
            self.subscribed
                .iter()
                .map(|channel| SessionEvent::PresenceChanged { channel: *channel, entry }),
        );
        events
    }

    /// Insert a message row. Returns the completion and fan-out, in the order
    /// the scripted behavior dictates.
    pub fn insert_message(
        &mut self,
        send_id: SendId,
        attempt: u32,
        message: NewMessage,
        now_ms: u64,
    ) -> Vec<SessionEvent> {
        self.inserts.push((send_id, attempt, message.clone()));
        let mut behavior = self.insert_script.pop_front().unwrap_or(self.default_insert);
        if self.chaos_fails(ChaosTarget::Insert) {
            behavior = InsertBehavior::Fail;
        }

        let failed = |error| {
            vec![SessionEvent::InsertCompleted { send_id, attempt, result: Err(error) }]
        };
        match behavior {
            InsertBehavior::Fail => failed(BackendError::Network("connection reset".into())),
            InsertBehavior::Reject => failed(BackendError::Rejected("constraint violation".into())),
            InsertBehavior::Succeed | InsertBehavior::EchoFirst | InsertBehavior::Hang => {
                let row = self.store(message.user_id, message.content, now_ms);
                let fan_out = self.fan_out(&row);
                let ack = SessionEvent::InsertCompleted { send_id, attempt, result: Ok(row.clone()) };
                match behavior {
                    InsertBehavior::EchoFirst => fan_out.into_iter().chain([ack]).collect(),
                    InsertBehavior::Hang => {
                        self.hung.push(HungInsert { send_id, attempt, row });
                        fan_out
                    },
                    _ => [ack].into_iter().chain(fan_out).collect(),
                }
            },
        }
    }

    /// Deliver every held acknowledgement.
    pub fn release_hung(&mut self) -> Vec<SessionEvent> {
        self.hung
            .drain(..)
            .map(|hung| SessionEvent::InsertCompleted {
                send_id: hung.send_id,
                attempt: hung.attempt,
                result: Ok(hung.row),
            })
            .collect()
    }

    /// Another participant posts a message.
    pub fn remote_message(
        &mut self,
        user_id: UserId,
        content: impl Into<String>,
        now_ms: u64,
    ) -> Vec<SessionEvent> {
        let row = self.store(user_id, content.into(), now_ms);
        self.fan_out(&row)
    }

    /// Another participant broadcasts on every subscribed channel.
    pub fn remote_broadcast(&mut self, broadcast: Broadcast) -> Vec<SessionEvent> {
        self.subscribed
            .iter()
            .map(|channel| SessionEvent::Broadcast { channel: *channel, broadcast })
            .collect()
    }

    /// Another participant refreshes their presence row.
    pub fn remote_presence(&mut self, user_id: UserId, last_seen_ms: u64) -> Vec<SessionEvent> {
        self.presence.insert(user_id, last_seen_ms);
        let entry = PresenceEntry { user_id, last_seen_ms };
        self.subscribed
            .iter()
            .map(|channel| SessionEvent::PresenceChanged { channel: *channel, entry })
            .collect()
    }

    /// Record a broadcast sent by the session.
    pub fn record_broadcast(&mut self, channel: ChannelId, broadcast: Broadcast) {
        self.broadcasts.push((channel, broadcast));
    }

    /// Stored message rows, in insertion order.
    pub fn messages(&self) -> &[StoredMessage] {
        &self.messages
    }

    /// Presence row for a user.
    pub fn last_seen(&self, user_id: UserId) -> Option<u64> {
        self.presence.get(&user_id).copied()
    }

    /// Every channel open, in order.
    pub fn opened(&self) -> &[(ChannelId, String)] {
        &self.opened
    }

    /// Every channel release, in order.
    pub fn released(&self) -> &[ChannelId] {
        &self.released
    }

    /// Currently subscribed channels.
    pub fn subscribed(&self) -> &BTreeSet<ChannelId> {
        &self.subscribed
    }

    /// Every broadcast sent by the session.
    pub fn broadcasts(&self) -> &[(ChannelId, Broadcast)] {
        &self.broadcasts
    }

    /// Every insert request, as `(send_id, attempt, message)`.
    pub fn inserts(&self) -> &[(SendId, u32, NewMessage)] {
        &self.inserts
    }

    /// Number of message reads.
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }

    /// Number of presence reads.
    pub fn presence_read_count(&self) -> usize {
        self.presence_reads
    }

    /// Number of presence upserts.
    pub fn touch_count(&self) -> usize {
        self.touches
    }

    fn store(&mut self, user_id: UserId, content: String, now_ms: u64) -> StoredMessage {
        let row = StoredMessage {
            id: self.next_row_id,
            content,
            created_at_ms: now_ms,
            user_id,
            author: None,
        };
        self.next_row_id += 1;
        self.messages.push(row.clone());
        row
    }

    fn fan_out(&self, row: &StoredMessage) -> Vec<SessionEvent> {
        self.subscribed
            .iter()
            .map(|channel| SessionEvent::MessageInserted { channel: *channel, message: row.clone() })
            .collect()
    }

    fn chaos_fails(&mut self, target: ChaosTarget) -> bool {
        self.chaos.as_mut().is_some_and(|chaos| chaos.should_fail(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_message(content: &str) -> NewMessage {
        NewMessage { user_id: UserId(1), content: content.into() }
    }

    #[test]
    fn scripted_channels_run_in_order() {
        let mut backend = SimBackend::new();
        backend.script_channels([ChannelBehavior::Reject, ChannelBehavior::Silent]);

        let first = backend.open_channel(ChannelId(1), "a".into());
        assert!(matches!(first.as_slice(), [SessionEvent::ChannelOpenFailed { .. }]));
        assert!(backend.open_channel(ChannelId(2), "b".into()).is_empty());

        let third = backend.open_channel(ChannelId(3), "c".into());
        assert!(matches!(third.as_slice(), [SessionEvent::ChannelStatus { .. }]));
        assert!(backend.subscribed().contains(&ChannelId(3)));
    }

    #[test]
    fn release_reports_closed() {
        let mut backend = SimBackend::new();
        backend.open_channel(ChannelId(1), "a".into());
        let events = backend.release_channel(ChannelId(1));

        assert_eq!(events, vec![SessionEvent::ChannelStatus {
            channel: ChannelId(1),
            status: ChannelStatus::Closed,
        }]);
        assert!(backend.subscribed().is_empty());
    }

    #[test]
    fn echo_first_fans_out_before_ack() {
        let mut backend = SimBackend::new();
        backend.open_channel(ChannelId(1), "a".into());
        backend.script_inserts([InsertBehavior::EchoFirst]);

        let events = backend.insert_message(SendId(1), 1, new_message("hi"), 10);
        assert!(matches!(events[0], SessionEvent::MessageInserted { .. }));
        assert!(matches!(events[1], SessionEvent::InsertCompleted { result: Ok(_), .. }));
    }

    #[test]
    fn hung_insert_is_stored_but_unacknowledged() {
        let mut backend = SimBackend::new();
        backend.script_inserts([InsertBehavior::Hang]);

        assert!(backend.insert_message(SendId(1), 1, new_message("hi"), 10).is_empty());
        assert_eq!(backend.messages().len(), 1);
        assert_eq!(backend.release_hung().len(), 1);
        assert!(backend.release_hung().is_empty());
    }

    #[test]
    fn select_messages_returns_newest_window() {
        let mut backend = SimBackend::new();
        for at in 0..5 {
            backend.remote_message(UserId(2), format!("m{at}"), at * 10);
        }

        let rows = backend.select_messages(None, 2).unwrap_or_default();
        let times: Vec<u64> = rows.iter().map(|r| r.created_at_ms).collect();
        assert_eq!(times, vec![30, 40]);

        let since = backend.select_messages(Some(20), 100).unwrap_or_default();
        assert_eq!(since.len(), 3);
    }
}
