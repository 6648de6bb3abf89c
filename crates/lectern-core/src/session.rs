//! Chat session state machine.
//!
//! One [`ChatSession`] exists per mounted chat view. It owns the connection
//! status, the current realtime channel, every timer, the merged message log,
//! presence, typing indicators and the outbox of unconfirmed sends.
//!
//! Uses the action pattern: methods consume events and return
//! [`SessionAction`]s for the driver to execute. The session never performs
//! I/O and never sleeps; all waiting happens through named [`Timer`]s.
//!
//! # Connect attempts
//!
//! Every path into [`ConnectionStatus::Connecting`] (initialize, backoff
//! reconnect, manual reconnect, online recovery, forced attempts before a
//! send) runs the same routine. Paths differ only in their retry budget: an
//! initialize-origin sequence falls back to polling after its budget of
//! outright failures, a reconnect-origin sequence ends in
//! [`ConnectionStatus::Failed`].
//!
//! # Channel identity
//!
//! The broker may report status for a channel long after the session stopped
//! caring about it, including the `Closed` produced by our own unsubscribe.
//! Lifecycle events are only acted on when they carry the current
//! [`ChannelId`]; retiring a channel forgets it *before* the deferred release
//! is emitted.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    channel::{Broadcast, ChannelId, ChannelStatus, channel_name},
    config::SessionConfig,
    env::Environment,
    error::BackendError,
    event::{Notification, SessionAction, SessionEvent},
    identity::{Identity, UserId},
    message::{Message, MessageId, MessageLog, NewMessage, SendId, StoredMessage},
    presence::PresenceBook,
    status::{ConnectionBadge, ConnectionStatus, DeliveryMode},
    timer::Timer,
    typing::{TypingBurst, TypingIndicators},
};

/// Which budget the current attempt sequence draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Budget {
    /// Started by `initialize`; exhausting it falls back to polling.
    Initial,
    /// Started by recovery; exhausting it enters `Failed`.
    Reconnect,
}

/// Unconfirmed outgoing message.
#[derive(Debug, Clone)]
struct Outgoing {
    content: String,
    /// Dispatches so far.
    tries: u32,
    /// A pending entry is shown and an insert is awaited.
    in_flight: bool,
}

/// Point-in-time view of session internals, for invariant checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Connection status.
    pub status: ConnectionStatus,
    /// Failed attempts in the current sequence.
    pub reconnect_attempts: u32,
    /// Channel events are currently accepted from.
    pub current_channel: Option<ChannelId>,
    /// Armed timers, sorted.
    pub armed_timers: Vec<Timer>,
    /// Message identities in display order.
    pub message_ids: Vec<MessageId>,
    /// Outgoing messages awaiting an insert, sorted.
    pub in_flight_sends: Vec<SendId>,
    /// Outgoing messages waiting for a retry, sorted.
    pub retrying_sends: Vec<SendId>,
}

/// Chat connection manager for a single view.
pub struct ChatSession<E: Environment> {
    env: E,
    config: SessionConfig,
    identity: Option<Identity>,
    /// `initialize` ran and `cleanup` has not.
    active: bool,
    status: ConnectionStatus,
    reconnect_attempts: u32,
    budget: Budget,
    network_online: bool,
    last_heartbeat: Option<E::Instant>,
    current_channel: Option<ChannelId>,
    next_channel: u64,
    next_send: u64,
    armed: BTreeSet<Timer>,
    messages: MessageLog,
    presence: PresenceBook,
    typing: TypingIndicators<E::Instant>,
    burst: TypingBurst,
    outbox: BTreeMap<SendId, Outgoing>,
    draft: String,
    notice: Option<Notification>,
}

impl<E: Environment> ChatSession<E> {
    /// Create a disconnected session without an identity.
    ///
    /// The network is assumed online until told otherwise.
    pub fn new(env: E, config: SessionConfig) -> Self {
        let presence = PresenceBook::new(config.presence_window);
        let typing = TypingIndicators::new(config.typing_expiry);
        Self {
            env,
            config,
            identity: None,
            active: false,
            status: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            budget: Budget::Initial,
            network_online: true,
            last_heartbeat: None,
            current_channel: None,
            next_channel: 1,
            next_send: 1,
            armed: BTreeSet::new(),
            messages: MessageLog::new(),
            presence,
            typing,
            burst: TypingBurst::default(),
            outbox: BTreeMap::new(),
            draft: String::new(),
            notice: None,
        }
    }

    /// Connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Failed attempts in the current attempt sequence. Zero while connected.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Last network signal from the environment.
    #[must_use]
    pub fn network_online(&self) -> bool {
        self.network_online
    }

    /// Logged-in user, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Messages in display order, pending sends last.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        self.messages.as_slice()
    }

    /// Users seen within the presence window, sorted.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        self.presence.online(self.env.wall_clock_ms())
    }

    /// Remote users currently typing, sorted.
    #[must_use]
    pub fn typing_users(&self) -> Vec<UserId> {
        self.typing.users()
    }

    /// Current input text, including text restored after a failed send.
    #[must_use]
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Most recent user-visible notification.
    #[must_use]
    pub fn notice(&self) -> Option<&Notification> {
        self.notice.as_ref()
    }

    /// Connection badge for the header.
    #[must_use]
    pub fn badge(&self) -> ConnectionBadge {
        ConnectionBadge::new(self.status, self.reconnect_attempts)
    }

    /// Armed timers.
    #[must_use]
    pub fn armed_timers(&self) -> &BTreeSet<Timer> {
        &self.armed
    }

    /// Channel whose events are currently accepted.
    #[must_use]
    pub fn current_channel(&self) -> Option<ChannelId> {
        self.current_channel
    }

    /// Instant of the last confirmed liveness signal.
    #[must_use]
    pub fn last_heartbeat(&self) -> Option<E::Instant> {
        self.last_heartbeat
    }

    /// Snapshot of internals for invariant checks.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let (in_flight, retrying): (Vec<_>, Vec<_>) =
            self.outbox.iter().partition(|(_, outgoing)| outgoing.in_flight);
        SessionSnapshot {
            status: self.status,
            reconnect_attempts: self.reconnect_attempts,
            current_channel: self.current_channel,
            armed_timers: self.armed.iter().copied().collect(),
            message_ids: self.messages.as_slice().iter().map(|m| m.id).collect(),
            in_flight_sends: in_flight.into_iter().map(|(id, _)| *id).collect(),
            retrying_sends: retrying.into_iter().map(|(id, _)| *id).collect(),
        }
    }

    /// Set or clear the logged-in user.
    ///
    /// Replacing an existing identity tears the session down first, including
    /// any sends made under the old identity.
    pub fn set_identity(&mut self, identity: Option<Identity>) -> Vec<SessionAction> {
        if self.identity == identity {
            return Vec::new();
        }

        let actions = if self.identity.is_some() { self.cleanup() } else { Vec::new() };
        self.identity = identity;
        actions
    }

    /// Start the session.
    ///
    /// A no-op without an identity, and while connecting or connected. If the
    /// network is offline the session is marked active and the attempt runs
    /// when the network returns.
    pub fn initialize(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.identity.is_none() {
            debug!("initialize without identity ignored");
            return actions;
        }
        if matches!(self.status, ConnectionStatus::Connecting | ConnectionStatus::Connected { .. })
        {
            debug!(status = %self.status, "initialize ignored");
            return actions;
        }

        self.active = true;
        if !self.network_online {
            debug!("initialize deferred until online");
            return actions;
        }

        self.budget = Budget::Initial;
        self.begin_attempt(&mut actions);
        actions
    }

    /// Schedule a backoff reconnect.
    ///
    /// The delay is `min(base * 2^attempts, cap)` for the current attempt
    /// count. A no-op while connecting or connected, when offline or when the
    /// session is not active. With the budget exhausted the session enters
    /// [`ConnectionStatus::Failed`] instead.
    pub fn reconnect(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if !self.can_attempt()
            || matches!(self.status, ConnectionStatus::Connecting | ConnectionStatus::Connected { .. })
        {
            return actions;
        }

        self.budget = Budget::Reconnect;
        self.schedule_reconnect(&mut actions);
        actions
    }

    /// User-requested reconnect.
    ///
    /// Resets the attempt counter, tears down delivery and the current channel
    /// and starts a fresh initialize-origin attempt immediately.
    pub fn manual_reconnect(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.identity.is_none() {
            return actions;
        }

        info!("manual reconnect");
        self.active = true;
        self.reconnect_attempts = 0;
        self.stop_delivery(&mut actions);
        self.retire_channel(&mut actions);
        self.cancel(Timer::Reconnect, &mut actions);
        self.transition(ConnectionStatus::Disconnected);

        if self.network_online {
            self.budget = Budget::Initial;
            self.begin_attempt(&mut actions);
        } else {
            actions.push(SessionAction::Render);
        }
        actions
    }

    /// Tear the session down (view unmounted).
    ///
    /// Cancels every timer except pending channel releases, retires the
    /// channel, drops unconfirmed sends and typing state. Late events are
    /// still accepted but trigger nothing.
    pub fn cleanup(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        info!("session cleanup");

        self.stop_typing(&mut actions);
        let timers: Vec<Timer> = self.armed.iter().copied().filter(|t| !t.is_release()).collect();
        for timer in timers {
            self.cancel(timer, &mut actions);
        }
        self.retire_channel(&mut actions);

        self.outbox.clear();
        self.messages.clear_pending();
        self.typing.clear();
        self.last_heartbeat = None;
        self.active = false;
        self.reconnect_attempts = 0;
        self.budget = Budget::Initial;
        self.transition(ConnectionStatus::Disconnected);

        actions.push(SessionAction::Render);
        actions
    }

    /// Send a message optimistically.
    ///
    /// Whitespace-only content is ignored. If not connected, one immediate
    /// connect attempt is started first; the send proceeds either way.
    pub fn send_message(&mut self, content: impl Into<String>) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        let content = content.into();
        if content.trim().is_empty() || self.identity.is_none() {
            return actions;
        }

        self.stop_typing(&mut actions);
        self.notice = None;
        if !self.status.is_connected() {
            self.force_attempt(&mut actions);
        }

        let send_id = SendId(self.next_send);
        self.next_send += 1;
        debug!(%send_id, "sending message");
        self.outbox.insert(send_id, Outgoing { content, tries: 0, in_flight: false });
        self.draft.clear();
        self.dispatch(send_id, &mut actions);
        actions
    }

    /// The input text changed.
    ///
    /// Non-empty input starts a typing burst (one `typing_start` per burst)
    /// and restarts the idle timer. Empty input ends the burst.
    pub fn input_changed(&mut self, text: impl Into<String>) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        self.draft = text.into();

        if self.draft.is_empty() {
            self.stop_typing(&mut actions);
        } else {
            if self.burst.begin()
                && let Some((channel, user_id)) = self.live_channel()
            {
                actions.push(SessionAction::Broadcast {
                    channel,
                    broadcast: Broadcast::TypingStart { user_id },
                });
            }
            self.arm(Timer::TypingIdle, self.config.typing_idle, &mut actions);
        }

        actions.push(SessionAction::Render);
        actions
    }

    /// Process an event from the driver.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        match event {
            SessionEvent::ChannelStatus { channel, status } => {
                self.on_channel_status(channel, status, &mut actions);
            },
            SessionEvent::ChannelOpenFailed { channel, error } => {
                self.on_open_failed(channel, &error, &mut actions);
            },
            SessionEvent::MessageInserted { channel, message } => {
                self.mark_alive(channel);
                self.typing.stop(message.user_id);
                if self.messages.insert_stored(message) {
                    actions.push(SessionAction::Render);
                }
            },
            SessionEvent::PresenceChanged { channel, entry } => {
                self.mark_alive(channel);
                self.presence.upsert(entry);
                actions.push(SessionAction::Render);
            },
            SessionEvent::Broadcast { channel, broadcast } => {
                self.mark_alive(channel);
                self.on_broadcast(broadcast, &mut actions);
            },
            SessionEvent::PresenceSync { channel } => {
                self.mark_alive(channel);
                actions.push(self.fetch_presence());
            },
            SessionEvent::MessagesFetched { result } => match result {
                Ok(rows) => {
                    let added = self.messages.merge(rows);
                    if added > 0 {
                        debug!(added, "merged fetched messages");
                        actions.push(SessionAction::Render);
                    }
                },
                Err(error) => warn!(%error, "message fetch failed"),
            },
            SessionEvent::PresenceFetched { result } => match result {
                Ok(entries) => {
                    self.presence.replace_all(entries);
                    actions.push(SessionAction::Render);
                },
                Err(error) => warn!(%error, "presence fetch failed"),
            },
            SessionEvent::PresenceTouched { result } => match result {
                Ok(()) => {
                    if self.status.mode() == Some(DeliveryMode::Realtime) {
                        self.last_heartbeat = Some(self.env.now());
                    }
                },
                Err(error) => warn!(%error, "presence update failed"),
            },
            SessionEvent::InsertCompleted { send_id, attempt, result } => match result {
                Ok(row) => self.on_send_confirmed(send_id, row, &mut actions),
                Err(error) => {
                    let current =
                        self.outbox.get(&send_id).is_some_and(|o| o.in_flight && o.tries == attempt);
                    if current {
                        self.on_send_failed(send_id, &error, &mut actions);
                    } else {
                        debug!(%send_id, attempt, %error, "ignoring stale insert failure");
                    }
                },
            },
            SessionEvent::TimerFired(timer) => self.on_timer(timer, &mut actions),
            SessionEvent::NetworkOffline => self.on_offline(&mut actions),
            SessionEvent::NetworkOnline => self.on_online(&mut actions),
        }
        actions
    }

    fn on_channel_status(
        &mut self,
        channel: ChannelId,
        status: ChannelStatus,
        actions: &mut Vec<SessionAction>,
    ) {
        if self.current_channel != Some(channel) {
            debug!(%channel, ?status, "ignoring status from retired channel");
            return;
        }

        match (status, self.status) {
            (ChannelStatus::Subscribed, ConnectionStatus::Connecting) => {
                self.enter_realtime(channel, actions);
            },
            (ChannelStatus::Subscribed, ConnectionStatus::Connected { .. }) => {
                self.mark_alive(channel);
            },
            (status, ConnectionStatus::Connecting) => {
                warn!(%channel, ?status, "subscription failed, falling back to polling");
                self.cancel(Timer::SubscribeTimeout(channel), actions);
                self.retire_channel(actions);
                self.enter_polling(actions);
            },
            (status, ConnectionStatus::Connected { mode: DeliveryMode::Realtime }) => {
                warn!(%channel, ?status, "channel closed unexpectedly");
                self.connection_lost(actions);
            },
            (status, current) => {
                debug!(%channel, ?status, %current, "ignoring channel status");
            },
        }
    }

    fn on_open_failed(
        &mut self,
        channel: ChannelId,
        error: &BackendError,
        actions: &mut Vec<SessionAction>,
    ) {
        if self.current_channel != Some(channel) || self.status != ConnectionStatus::Connecting {
            debug!(%channel, %error, "ignoring open failure of retired channel");
            return;
        }

        // Nothing was opened, so there is nothing to release.
        self.cancel(Timer::SubscribeTimeout(channel), actions);
        self.current_channel = None;
        self.reconnect_attempts += 1;
        warn!(%channel, %error, attempts = self.reconnect_attempts, "connect attempt failed");

        if self.reconnect_attempts < self.budget_limit() {
            self.schedule_reconnect(actions);
            return;
        }

        match self.budget {
            Budget::Initial => {
                warn!("initial attempts exhausted, polling as last resort");
                self.enter_polling(actions);
            },
            Budget::Reconnect => {
                warn!("reconnect attempts exhausted");
                self.transition(ConnectionStatus::Failed);
                actions.push(SessionAction::Render);
            },
        }
    }

    fn on_broadcast(&mut self, broadcast: Broadcast, actions: &mut Vec<SessionAction>) {
        let user_id = broadcast.user_id();
        if self.identity.as_ref().is_some_and(|me| me.user_id == user_id) {
            return;
        }

        let changed = match broadcast {
            Broadcast::TypingStart { .. } => {
                self.typing.start(user_id, self.env.now());
                if !self.armed.contains(&Timer::TypingExpiry) {
                    self.arm(Timer::TypingExpiry, self.config.typing_expiry, actions);
                }
                true
            },
            Broadcast::TypingStop { .. } => self.typing.stop(user_id),
        };
        if changed {
            actions.push(SessionAction::Render);
        }
    }

    fn on_send_confirmed(
        &mut self,
        send_id: SendId,
        row: StoredMessage,
        actions: &mut Vec<SessionAction>,
    ) {
        self.messages.reconcile(send_id, row);

        if let Some(outgoing) = self.outbox.remove(&send_id) {
            debug!(%send_id, tries = outgoing.tries, "send confirmed");
            self.cancel(Timer::SendTimeout(send_id), actions);
            self.cancel(Timer::SendRetry(send_id), actions);
            // Late success after the text was restored into the input.
            if !outgoing.in_flight && self.draft == outgoing.content {
                self.draft.clear();
            }
        }
        actions.push(SessionAction::Render);
    }

    fn on_send_failed(
        &mut self,
        send_id: SendId,
        error: &BackendError,
        actions: &mut Vec<SessionAction>,
    ) {
        let Some(outgoing) = self.outbox.get_mut(&send_id) else {
            return;
        };
        outgoing.in_flight = false;
        let tries = outgoing.tries;
        let content = outgoing.content.clone();

        self.cancel(Timer::SendTimeout(send_id), actions);
        self.messages.remove_pending(send_id);
        self.draft.clone_from(&content);

        if error.is_transient() && tries <= self.config.max_send_retries {
            let delay = self.config.send_retry_delay(tries);
            warn!(%send_id, tries, %error, ?delay, "send failed, retrying");
            self.arm(Timer::SendRetry(send_id), delay, actions);
            actions.push(SessionAction::Render);
            return;
        }

        warn!(%send_id, tries, %error, "send abandoned");
        self.outbox.remove(&send_id);
        let notification = Notification::SendFailed { content };
        self.notice = Some(notification.clone());
        actions.push(SessionAction::Notify(notification));

        // Retries ran out on a connectivity failure: restore the connection
        // for future sends. A rejected row says nothing about the channel.
        if error.is_transient()
            && self.can_attempt()
            && self.status != ConnectionStatus::Connecting
        {
            self.budget = Budget::Reconnect;
            self.begin_attempt(actions);
        } else {
            actions.push(SessionAction::Render);
        }
    }

    fn on_timer(&mut self, timer: Timer, actions: &mut Vec<SessionAction>) {
        if !self.armed.remove(&timer) {
            debug!(%timer, "ignoring stale timer");
            return;
        }

        match timer {
            Timer::SubscribeTimeout(channel) => {
                if self.current_channel == Some(channel)
                    && self.status == ConnectionStatus::Connecting
                {
                    warn!(%channel, "subscription timed out, falling back to polling");
                    self.retire_channel(actions);
                    self.enter_polling(actions);
                }
            },
            Timer::Heartbeat => {
                let now = self.env.now();
                let stale = self
                    .last_heartbeat
                    .is_none_or(|at| now - at > self.config.heartbeat_stale_after);
                if stale {
                    warn!("heartbeat stale, reconnecting");
                    self.connection_lost(actions);
                } else {
                    actions.extend(self.touch_presence());
                    self.arm(Timer::Heartbeat, self.config.heartbeat_interval, actions);
                }
            },
            Timer::PollMessages => {
                actions.push(self.fetch_messages());
                self.arm(timer, self.config.poll_messages_every, actions);
            },
            Timer::PollPresence => {
                actions.extend(self.touch_presence());
                self.arm(timer, self.config.poll_presence_every, actions);
            },
            Timer::RefreshOnline => {
                actions.push(self.fetch_presence());
                self.arm(timer, self.config.refresh_online_every, actions);
            },
            Timer::Reconnect => {
                if self.status == ConnectionStatus::Reconnecting && self.can_attempt() {
                    self.begin_attempt(actions);
                }
            },
            Timer::ReleaseChannel(channel) => {
                debug!(%channel, "releasing channel");
                actions.push(SessionAction::ReleaseChannel { channel });
            },
            Timer::SendTimeout(send_id) => {
                let timeout = self.config.send_timeout;
                self.on_send_failed(send_id, &BackendError::Timeout(timeout), actions);
            },
            Timer::SendRetry(send_id) => {
                if !self.outbox.contains_key(&send_id) {
                    return;
                }
                if !self.status.is_connected() {
                    self.force_attempt(actions);
                }
                self.dispatch(send_id, actions);
            },
            Timer::TypingIdle => self.stop_typing(actions),
            Timer::TypingExpiry => {
                let now = self.env.now();
                if self.typing.expire(now) {
                    actions.push(SessionAction::Render);
                }
                if let Some(next) = self.typing.next_expiry(now) {
                    self.arm(Timer::TypingExpiry, next, actions);
                }
            },
        }
    }

    fn on_offline(&mut self, actions: &mut Vec<SessionAction>) {
        self.network_online = false;
        if self.status == ConnectionStatus::Disconnected && self.current_channel.is_none() {
            return;
        }

        warn!(status = %self.status, "network offline");
        self.stop_delivery(actions);
        self.retire_channel(actions);
        self.cancel(Timer::Reconnect, actions);
        self.transition(ConnectionStatus::Disconnected);
        actions.push(SessionAction::Render);
    }

    fn on_online(&mut self, actions: &mut Vec<SessionAction>) {
        self.network_online = true;
        if self.active && self.identity.is_some() && self.status.is_disconnected() {
            info!(status = %self.status, "network online, reconnecting now");
            self.reconnect_attempts = 0;
            self.budget = Budget::Reconnect;
            self.begin_attempt(actions);
        }
    }

    /// Single entry into `Connecting`.
    fn begin_attempt(&mut self, actions: &mut Vec<SessionAction>) {
        let Some(user_id) = self.identity.as_ref().map(|me| me.user_id) else {
            return;
        };

        self.cancel(Timer::Reconnect, actions);
        self.stop_delivery(actions);
        self.retire_channel(actions);
        self.transition(ConnectionStatus::Connecting);

        // Independent best-effort fetches.
        actions.push(self.fetch_messages());
        actions.push(self.fetch_presence());

        let channel = ChannelId(self.next_channel);
        self.next_channel += 1;
        self.current_channel = Some(channel);
        let name = channel_name(user_id, self.env.wall_clock_ms());
        info!(%channel, %name, attempts = self.reconnect_attempts, "opening channel");
        actions.push(SessionAction::OpenChannel { channel, name });
        self.arm(Timer::SubscribeTimeout(channel), self.config.subscribe_timeout, actions);
        actions.push(SessionAction::Render);
    }

    /// One immediate attempt outside the backoff schedule.
    fn force_attempt(&mut self, actions: &mut Vec<SessionAction>) {
        if self.can_attempt() && self.status != ConnectionStatus::Connecting {
            self.active = true;
            self.begin_attempt(actions);
        }
    }

    fn schedule_reconnect(&mut self, actions: &mut Vec<SessionAction>) {
        if self.reconnect_attempts >= self.budget_limit() {
            self.transition(ConnectionStatus::Failed);
            actions.push(SessionAction::Render);
            return;
        }

        let delay = self.config.reconnect_delay(self.reconnect_attempts);
        info!(attempts = self.reconnect_attempts, ?delay, "reconnect scheduled");
        self.arm(Timer::Reconnect, delay, actions);
        self.transition(ConnectionStatus::Reconnecting);
        actions.push(SessionAction::Render);
    }

    fn connection_lost(&mut self, actions: &mut Vec<SessionAction>) {
        self.stop_delivery(actions);
        self.retire_channel(actions);
        self.budget = Budget::Reconnect;
        self.schedule_reconnect(actions);
    }

    fn enter_realtime(&mut self, channel: ChannelId, actions: &mut Vec<SessionAction>) {
        self.cancel(Timer::SubscribeTimeout(channel), actions);
        self.transition(ConnectionStatus::Connected { mode: DeliveryMode::Realtime });
        self.last_heartbeat = Some(self.env.now());
        self.arm(Timer::Heartbeat, self.config.heartbeat_interval, actions);
        actions.extend(self.touch_presence());
        actions.push(SessionAction::Render);
    }

    fn enter_polling(&mut self, actions: &mut Vec<SessionAction>) {
        self.transition(ConnectionStatus::Connected { mode: DeliveryMode::Polling });
        // Armed in this order so that equal deadlines fire messages first.
        self.arm(Timer::PollMessages, self.config.poll_messages_every, actions);
        self.arm(Timer::PollPresence, self.config.poll_presence_every, actions);
        self.arm(Timer::RefreshOnline, self.config.refresh_online_every, actions);
        actions.extend(self.touch_presence());
        actions.push(SessionAction::Render);
    }

    /// Cancel heartbeat, pollers and the subscribe deadline.
    fn stop_delivery(&mut self, actions: &mut Vec<SessionAction>) {
        self.cancel(Timer::Heartbeat, actions);
        for timer in Timer::POLLERS {
            self.cancel(timer, actions);
        }
        if let Some(channel) = self.current_channel {
            self.cancel(Timer::SubscribeTimeout(channel), actions);
        }
        self.last_heartbeat = None;
    }

    /// Forget the current channel, then release it after a short deferral.
    fn retire_channel(&mut self, actions: &mut Vec<SessionAction>) {
        let Some(channel) = self.current_channel.take() else {
            return;
        };
        debug!(%channel, "retiring channel");
        self.cancel(Timer::SubscribeTimeout(channel), actions);
        self.arm(Timer::ReleaseChannel(channel), self.config.channel_release_delay, actions);
    }

    fn dispatch(&mut self, send_id: SendId, actions: &mut Vec<SessionAction>) {
        let Some((user_id, author)) = self.identity.as_ref().map(|me| (me.user_id, me.author()))
        else {
            return;
        };
        let Some(outgoing) = self.outbox.get_mut(&send_id) else {
            return;
        };
        outgoing.tries += 1;
        outgoing.in_flight = true;
        let attempt = outgoing.tries;
        let content = outgoing.content.clone();

        if !self.messages.has_pending(send_id) {
            self.messages.push_pending(Message {
                id: MessageId::Pending(send_id),
                content: content.clone(),
                created_at_ms: self.env.wall_clock_ms(),
                user_id,
                author: Some(author),
            });
        }
        if self.draft == content {
            self.draft.clear();
        }

        actions.push(SessionAction::InsertMessage {
            send_id,
            attempt,
            message: NewMessage { user_id, content },
        });
        self.arm(Timer::SendTimeout(send_id), self.config.send_timeout, actions);
        actions.push(SessionAction::Render);
    }

    fn stop_typing(&mut self, actions: &mut Vec<SessionAction>) {
        if !self.burst.end() {
            return;
        }
        self.cancel(Timer::TypingIdle, actions);
        if let Some((channel, user_id)) = self.live_channel() {
            actions.push(SessionAction::Broadcast {
                channel,
                broadcast: Broadcast::TypingStop { user_id },
            });
        }
    }

    /// Subscribed channel and our user, if broadcasts can be sent.
    fn live_channel(&self) -> Option<(ChannelId, UserId)> {
        if self.status.mode() != Some(DeliveryMode::Realtime) {
            return None;
        }
        Some((self.current_channel?, self.identity.as_ref()?.user_id))
    }

    fn mark_alive(&mut self, channel: ChannelId) {
        if self.current_channel == Some(channel) {
            self.last_heartbeat = Some(self.env.now());
        }
    }

    fn fetch_messages(&self) -> SessionAction {
        SessionAction::FetchMessages {
            since_ms: self.messages.latest_stored_at(),
            limit: self.config.history_limit,
        }
    }

    fn fetch_presence(&self) -> SessionAction {
        SessionAction::FetchPresence {
            active_since_ms: self.presence.active_since(self.env.wall_clock_ms()),
        }
    }

    fn touch_presence(&self) -> Option<SessionAction> {
        let user_id = self.identity.as_ref()?.user_id;
        Some(SessionAction::TouchPresence { user_id, last_seen_ms: self.env.wall_clock_ms() })
    }

    fn can_attempt(&self) -> bool {
        self.active && self.network_online && self.identity.is_some()
    }

    fn budget_limit(&self) -> u32 {
        match self.budget {
            Budget::Initial => self.config.max_initial_attempts,
            Budget::Reconnect => self.config.max_reconnect_attempts,
        }
    }

    fn arm(&mut self, timer: Timer, after: Duration, actions: &mut Vec<SessionAction>) {
        self.armed.insert(timer);
        actions.push(SessionAction::SetTimer { timer, after });
    }

    fn cancel(&mut self, timer: Timer, actions: &mut Vec<SessionAction>) {
        if self.armed.remove(&timer) {
            actions.push(SessionAction::CancelTimer { timer });
        }
    }

    fn transition(&mut self, to: ConnectionStatus) {
        if self.status == to {
            return;
        }
        info!(from = %self.status, %to, "connection status changed");
        self.status = to;
        if to.is_connected() {
            self.reconnect_attempts = 0;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{
        future::Future,
        ops::Sub,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
    };

    use super::*;

    const EPOCH_MS: u64 = 1_700_000_000_000;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    struct TestInstant(u64);

    impl Sub for TestInstant {
        type Output = Duration;
        fn sub(self, rhs: Self) -> Duration {
            Duration::from_millis(self.0.saturating_sub(rhs.0))
        }
    }

    #[derive(Debug, Clone, Default)]
    struct TestEnv {
        now_ms: Arc<AtomicU64>,
    }

    impl TestEnv {
        fn advance(&self, by: Duration) {
            let ms = u64::try_from(by.as_millis()).unwrap();
            self.now_ms.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Environment for TestEnv {
        type Instant = TestInstant;

        fn now(&self) -> TestInstant {
            TestInstant(self.now_ms.load(Ordering::SeqCst))
        }

        fn wall_clock_ms(&self) -> u64 {
            EPOCH_MS + self.now_ms.load(Ordering::SeqCst)
        }

        fn sleep(&self, _duration: Duration) -> impl Future<Output = ()> + Send {
            std::future::ready(())
        }
    }

    fn session() -> (ChatSession<TestEnv>, TestEnv) {
        let env = TestEnv::default();
        let mut session = ChatSession::new(env.clone(), SessionConfig::default());
        session.set_identity(Some(Identity::new(UserId(1), "ada")));
        (session, env)
    }

    fn opened(actions: &[SessionAction]) -> Vec<ChannelId> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::OpenChannel { channel, .. } => Some(*channel),
                _ => None,
            })
            .collect()
    }

    fn armed(actions: &[SessionAction]) -> Vec<Timer> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::SetTimer { timer, .. } => Some(*timer),
                _ => None,
            })
            .collect()
    }

    fn subscribed(channel: ChannelId) -> SessionEvent {
        SessionEvent::ChannelStatus { channel, status: ChannelStatus::Subscribed }
    }

    #[test]
    fn initialize_opens_channel_and_fetches() {
        let (mut session, _env) = session();
        let actions = session.initialize();

        assert_eq!(session.status(), ConnectionStatus::Connecting);
        assert_eq!(opened(&actions), vec![ChannelId(1)]);
        assert!(actions.contains(&SessionAction::FetchMessages { since_ms: None, limit: 100 }));
        assert!(actions.iter().any(|a| matches!(a, SessionAction::FetchPresence { .. })));
        assert_eq!(armed(&actions), vec![Timer::SubscribeTimeout(ChannelId(1))]);
    }

    #[test]
    fn initialize_requires_identity() {
        let mut session = ChatSession::new(TestEnv::default(), SessionConfig::default());
        assert!(session.initialize().is_empty());
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn initialize_is_idempotent() {
        let (mut session, _env) = session();
        session.initialize();
        assert!(session.initialize().is_empty());

        session.handle(subscribed(ChannelId(1)));
        assert!(session.initialize().is_empty());
        assert_eq!(session.current_channel(), Some(ChannelId(1)));
    }

    #[test]
    fn subscription_enters_realtime() {
        let (mut session, _env) = session();
        session.initialize();
        let actions = session.handle(subscribed(ChannelId(1)));

        assert_eq!(session.status(), ConnectionStatus::Connected { mode: DeliveryMode::Realtime });
        assert_eq!(armed(&actions), vec![Timer::Heartbeat]);
        assert!(actions.contains(&SessionAction::CancelTimer {
            timer: Timer::SubscribeTimeout(ChannelId(1))
        }));
        assert!(actions.iter().any(|a| matches!(a, SessionAction::TouchPresence { .. })));
    }

    #[test]
    fn subscribe_timeout_falls_back_to_polling() {
        let (mut session, _env) = session();
        session.initialize();
        let actions = session.handle(SessionEvent::TimerFired(Timer::SubscribeTimeout(ChannelId(1))));

        assert_eq!(session.status(), ConnectionStatus::Connected { mode: DeliveryMode::Polling });
        assert_eq!(session.current_channel(), None);
        assert_eq!(
            armed(&actions),
            vec![
                Timer::ReleaseChannel(ChannelId(1)),
                Timer::PollMessages,
                Timer::PollPresence,
                Timer::RefreshOnline,
            ]
        );
    }

    #[test]
    fn retired_channel_status_is_ignored() {
        let (mut session, _env) = session();
        session.initialize();
        session.handle(subscribed(ChannelId(1)));
        session.cleanup();

        let actions = session.handle(SessionEvent::ChannelStatus {
            channel: ChannelId(1),
            status: ChannelStatus::Closed,
        });
        assert!(actions.is_empty());
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert_eq!(
            session.armed_timers().iter().copied().collect::<Vec<_>>(),
            vec![Timer::ReleaseChannel(ChannelId(1))]
        );
    }

    #[test]
    fn open_failures_exhaust_initial_budget_into_polling() {
        let (mut session, _env) = session();
        session.initialize();

        for attempt in 1..=3u64 {
            let channel = ChannelId(attempt);
            session.handle(SessionEvent::ChannelOpenFailed {
                channel,
                error: BackendError::Network("refused".into()),
            });
            if attempt < 3 {
                assert_eq!(session.status(), ConnectionStatus::Reconnecting);
                assert_eq!(session.reconnect_attempts(), u32::try_from(attempt).unwrap());
                session.handle(SessionEvent::TimerFired(Timer::Reconnect));
            }
        }

        assert_eq!(session.status(), ConnectionStatus::Connected { mode: DeliveryMode::Polling });
        assert_eq!(session.reconnect_attempts(), 0);
    }

    #[test]
    fn stale_timer_fire_is_ignored() {
        let (mut session, _env) = session();
        session.initialize();
        session.handle(subscribed(ChannelId(1)));

        let actions = session.handle(SessionEvent::TimerFired(Timer::SubscribeTimeout(ChannelId(1))));
        assert!(actions.is_empty());
        assert!(session.status().is_connected());
    }

    #[test]
    fn heartbeat_goes_stale_without_liveness() {
        let (mut session, env) = session();
        session.initialize();
        session.handle(subscribed(ChannelId(1)));

        env.advance(Duration::from_secs(30));
        session.handle(SessionEvent::TimerFired(Timer::Heartbeat));
        assert!(session.status().is_connected());

        env.advance(Duration::from_secs(31));
        session.handle(SessionEvent::TimerFired(Timer::Heartbeat));
        assert_eq!(session.status(), ConnectionStatus::Reconnecting);
        assert!(session.armed_timers().contains(&Timer::Reconnect));
    }

    #[test]
    fn send_is_optimistic_and_reconciles() {
        let (mut session, _env) = session();
        session.initialize();
        session.handle(subscribed(ChannelId(1)));
        session.input_changed("hello");

        let actions = session.send_message("hello");
        assert_eq!(session.draft(), "");
        assert_eq!(session.messages().len(), 1);
        assert!(session.messages()[0].is_pending());
        assert!(actions.iter().any(|a| matches!(
            a,
            SessionAction::InsertMessage { send_id: SendId(1), attempt: 1, .. }
        )));

        session.handle(SessionEvent::InsertCompleted {
            send_id: SendId(1),
            attempt: 1,
            result: Ok(StoredMessage {
                id: 42,
                content: "hello".into(),
                created_at_ms: EPOCH_MS,
                user_id: UserId(1),
                author: None,
            }),
        });
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].id, MessageId::Stored(42));
        assert!(!session.armed_timers().contains(&Timer::SendTimeout(SendId(1))));
    }

    #[test]
    fn failed_send_restores_draft() {
        let (mut session, _env) = session();
        session.initialize();
        session.handle(subscribed(ChannelId(1)));
        session.send_message("hello");

        session.handle(SessionEvent::InsertCompleted {
            send_id: SendId(1),
            attempt: 1,
            result: Err(BackendError::Network("reset".into())),
        });
        assert!(session.messages().is_empty());
        assert_eq!(session.draft(), "hello");
        assert!(session.armed_timers().contains(&Timer::SendRetry(SendId(1))));
    }

    #[test]
    fn rejected_send_notifies_immediately() {
        let (mut session, _env) = session();
        session.initialize();
        session.handle(subscribed(ChannelId(1)));
        session.send_message("hello");

        let actions = session.handle(SessionEvent::InsertCompleted {
            send_id: SendId(1),
            attempt: 1,
            result: Err(BackendError::Rejected("too long".into())),
        });
        let notification = Notification::SendFailed { content: "hello".into() };
        assert!(actions.contains(&SessionAction::Notify(notification.clone())));
        assert_eq!(session.notice(), Some(&notification));
        assert_eq!(session.draft(), "hello");
    }

    #[test]
    fn own_typing_broadcast_is_ignored() {
        let (mut session, _env) = session();
        session.initialize();
        session.handle(subscribed(ChannelId(1)));

        session.handle(SessionEvent::Broadcast {
            channel: ChannelId(1),
            broadcast: Broadcast::TypingStart { user_id: UserId(1) },
        });
        assert!(session.typing_users().is_empty());

        session.handle(SessionEvent::Broadcast {
            channel: ChannelId(1),
            broadcast: Broadcast::TypingStart { user_id: UserId(2) },
        });
        assert_eq!(session.typing_users(), vec![UserId(2)]);
    }

    #[test]
    fn offline_disconnects_and_online_reconnects() {
        let (mut session, _env) = session();
        session.initialize();
        session.handle(subscribed(ChannelId(1)));

        session.handle(SessionEvent::NetworkOffline);
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert_eq!(session.current_channel(), None);

        let actions = session.handle(SessionEvent::NetworkOnline);
        assert_eq!(session.status(), ConnectionStatus::Connecting);
        assert_eq!(opened(&actions), vec![ChannelId(2)]);
    }
}
