//! Simulation driver executing session actions against the scripted backend.
//!
//! `SimDriver` plays the role the tokio runtime plays in production: it
//! executes every [`SessionAction`] and feeds the resulting events back into
//! the session. Timers live in a virtual queue ordered by deadline and then by
//! arming order, so equal deadlines fire in the order they were armed. Backend
//! responses are delivered with zero latency and the inbox is drained to
//! quiescence after every step.
//!
//! With an [`InvariantRegistry`] attached, every invariant is checked after
//! every single event the session handles.

use std::{
    collections::{BTreeMap, VecDeque},
    time::Duration,
};

use lectern_core::{
    Broadcast, ChatSession, Environment, Identity, Notification, SessionAction, SessionConfig,
    SessionEvent, Timer, UserId,
};
use tracing::trace;

use crate::{
    invariants::InvariantRegistry,
    operation::Operation,
    sim_backend::SimBackend,
    sim_env::{SimEnv, SimInstant},
};

/// A `SetTimer` the session issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRecord {
    /// Virtual time the timer was armed.
    pub at: Duration,
    /// Timer key.
    pub timer: Timer,
    /// Requested delay.
    pub after: Duration,
}

/// Deterministic driver for a single session.
pub struct SimDriver {
    env: SimEnv,
    session: ChatSession<SimEnv>,
    backend: SimBackend,
    /// Armed timers with `(deadline, arm sequence)`.
    timers: BTreeMap<Timer, (SimInstant, u64)>,
    next_seq: u64,
    inbox: VecDeque<SessionEvent>,
    timer_log: Vec<TimerRecord>,
    history: Vec<(Duration, SessionAction)>,
    notifications: Vec<Notification>,
    renders: usize,
    invariants: Option<InvariantRegistry>,
}

impl SimDriver {
    /// Create a driver for `identity` with the default configuration.
    pub fn new(identity: Identity) -> Self {
        Self::with_config(identity, SessionConfig::default())
    }

    /// Create a driver for `identity` with a custom configuration.
    pub fn with_config(identity: Identity, config: SessionConfig) -> Self {
        let env = SimEnv::new();
        let mut driver = Self {
            session: ChatSession::new(env.clone(), config),
            env,
            backend: SimBackend::new(),
            timers: BTreeMap::new(),
            next_seq: 0,
            inbox: VecDeque::new(),
            timer_log: Vec::new(),
            history: Vec::new(),
            notifications: Vec::new(),
            renders: 0,
            invariants: None,
        };
        let actions = driver.session.set_identity(Some(identity));
        driver.run(actions, || "set_identity".into());
        driver
    }

    /// Enable invariant checking after every step.
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(registry);
        self.check_invariants(|| "enabling invariants".into());
        self
    }

    /// The session under test.
    pub fn session(&self) -> &ChatSession<SimEnv> {
        &self.session
    }

    /// The simulated backend.
    pub fn backend(&self) -> &SimBackend {
        &self.backend
    }

    /// The simulated backend, for scripting.
    pub fn backend_mut(&mut self) -> &mut SimBackend {
        &mut self.backend
    }

    /// The virtual environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Virtual time since the start of the simulation.
    pub fn now(&self) -> Duration {
        self.env.now().elapsed()
    }

    /// Every `SetTimer` issued so far.
    pub fn timer_log(&self) -> &[TimerRecord] {
        &self.timer_log
    }

    /// Delays requested for a timer key, in arming order.
    pub fn armed_delays(&self, timer: Timer) -> Vec<Duration> {
        self.timer_log.iter().filter(|r| r.timer == timer).map(|r| r.after).collect()
    }

    /// Time until an armed timer fires. `None` if not armed.
    pub fn remaining(&self, timer: Timer) -> Option<Duration> {
        self.timers.get(&timer).map(|(deadline, _)| *deadline - self.env.now())
    }

    /// Every action executed so far, with the virtual time it was executed.
    pub fn history(&self) -> &[(Duration, SessionAction)] {
        &self.history
    }

    /// Notifications raised so far.
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Number of `Render` actions so far.
    pub fn renders(&self) -> usize {
        self.renders
    }

    /// Mount the view.
    pub fn initialize(&mut self) {
        let actions = self.session.initialize();
        self.run(actions, || "initialize".into());
    }

    /// Explicit backoff reconnect.
    pub fn reconnect(&mut self) {
        let actions = self.session.reconnect();
        self.run(actions, || "reconnect".into());
    }

    /// Click the reconnect button.
    pub fn manual_reconnect(&mut self) {
        let actions = self.session.manual_reconnect();
        self.run(actions, || "manual_reconnect".into());
    }

    /// Unmount the view.
    pub fn cleanup(&mut self) {
        let actions = self.session.cleanup();
        self.run(actions, || "cleanup".into());
    }

    /// Send a message.
    pub fn send(&mut self, content: &str) {
        let actions = self.session.send_message(content);
        self.run(actions, || format!("send {content:?}"));
    }

    /// Replace the input text (one keystroke).
    pub fn type_text(&mut self, text: &str) {
        let actions = self.session.input_changed(text);
        self.run(actions, || format!("type {text:?}"));
    }

    /// The environment reports the network lost.
    pub fn go_offline(&mut self) {
        self.deliver([SessionEvent::NetworkOffline]);
    }

    /// The environment reports the network back.
    pub fn go_online(&mut self) {
        self.deliver([SessionEvent::NetworkOnline]);
    }

    /// Another participant posts a message.
    pub fn remote_message(&mut self, user_id: UserId, content: &str) {
        let now_ms = self.env.wall_clock_ms();
        let events = self.backend.remote_message(user_id, content, now_ms);
        self.deliver(events);
    }

    /// Another participant starts or stops typing.
    pub fn remote_typing(&mut self, user_id: UserId, start: bool) {
        let broadcast = if start {
            Broadcast::TypingStart { user_id }
        } else {
            Broadcast::TypingStop { user_id }
        };
        let events = self.backend.remote_broadcast(broadcast);
        self.deliver(events);
    }

    /// Another participant refreshes their presence.
    pub fn remote_presence(&mut self, user_id: UserId) {
        let now_ms = self.env.wall_clock_ms();
        let events = self.backend.remote_presence(user_id, now_ms);
        self.deliver(events);
    }

    /// The broker drops the session's current channel.
    pub fn drop_channel(&mut self) {
        if let Some(channel) = self.session.current_channel() {
            let events = self.backend.drop_channel(channel);
            self.deliver(events);
        }
    }

    /// Deliver every held insert acknowledgement.
    pub fn release_hung_inserts(&mut self) {
        let events = self.backend.release_hung();
        self.deliver(events);
    }

    /// Feed events to the session as if the backend produced them.
    pub fn deliver(&mut self, events: impl IntoIterator<Item = SessionEvent>) {
        self.inbox.extend(events);
        self.run(Vec::new(), || "deliver".into());
    }

    /// Let virtual time pass, firing every timer that comes due.
    pub fn advance(&mut self, by: Duration) {
        let target = self.env.now() + by;
        while let Some((timer, deadline)) = self.next_due(target) {
            self.timers.remove(&timer);
            self.env.advance_to(deadline);
            trace!(%timer, at = ?deadline.elapsed(), "timer fired");
            let actions = self.session.handle(SessionEvent::TimerFired(timer));
            self.run(actions, || format!("timer {timer} at {:?}", deadline.elapsed()));
        }
        self.env.advance_to(target);
    }

    /// Let `millis` of virtual time pass.
    pub fn advance_ms(&mut self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Apply a randomized operation.
    pub fn apply(&mut self, operation: &Operation) {
        match operation {
            Operation::Initialize => self.initialize(),
            Operation::ManualReconnect => self.manual_reconnect(),
            Operation::Reconnect => self.reconnect(),
            Operation::Cleanup => self.cleanup(),
            Operation::Send { seed } => self.send(&Operation::content(*seed)),
            Operation::Type { len } => self.type_text(&"x".repeat(usize::from(*len))),
            Operation::ClearInput => self.type_text(""),
            Operation::GoOffline => self.go_offline(),
            Operation::GoOnline => self.go_online(),
            Operation::Advance { millis } => self.advance_ms(u64::from(*millis)),
            Operation::RemoteMessage { user } => {
                self.remote_message(remote_user(*user), "hello from a classmate");
            },
            Operation::RemoteTyping { user, start } => self.remote_typing(remote_user(*user), *start),
            Operation::DropChannel => self.drop_channel(),
            Operation::ScriptChannel(behavior) => self.backend.script_channels([*behavior]),
            Operation::ScriptInsert(behavior) => self.backend.script_inserts([*behavior]),
            Operation::FailFetches(fail) => self.backend.set_fail_fetches(*fail),
            Operation::FailTouches(fail) => self.backend.set_fail_touches(*fail),
            Operation::ReleaseHungInserts => self.release_hung_inserts(),
        }
    }

    /// Check invariants against the current session state.
    pub fn check_invariants(&self, context: impl FnOnce() -> String) {
        if let Some(registry) = &self.invariants {
            registry.assert_all(&self.session.snapshot(), &context());
        }
    }

    fn next_due(&self, target: SimInstant) -> Option<(Timer, SimInstant)> {
        self.timers
            .iter()
            .min_by_key(|(_, (deadline, seq))| (*deadline, *seq))
            .map(|(timer, (deadline, _))| (*timer, *deadline))
            .filter(|(_, deadline)| *deadline <= target)
    }

    /// Execute actions, then drain the inbox to quiescence.
    fn run(&mut self, actions: Vec<SessionAction>, context: impl Fn() -> String) {
        self.execute(actions);
        self.check_invariants(&context);

        while let Some(event) = self.inbox.pop_front() {
            let summary = self.invariants.as_ref().map(|_| format!("{event:?}"));
            let actions = self.session.handle(event);
            self.execute(actions);
            self.check_invariants(|| {
                format!("after {} ({})", summary.unwrap_or_default(), context())
            });
        }
    }

    fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            let now = self.env.now();
            self.history.push((now.elapsed(), action.clone()));

            match action {
                SessionAction::OpenChannel { channel, name } => {
                    let events = self.backend.open_channel(channel, name);
                    self.inbox.extend(events);
                },
                SessionAction::ReleaseChannel { channel } => {
                    let events = self.backend.release_channel(channel);
                    self.inbox.extend(events);
                },
                SessionAction::FetchMessages { since_ms, limit } => {
                    let result = self.backend.select_messages(since_ms, limit);
                    self.inbox.push_back(SessionEvent::MessagesFetched { result });
                },
                SessionAction::FetchPresence { active_since_ms } => {
                    let result = self.backend.select_presence(active_since_ms);
                    self.inbox.push_back(SessionEvent::PresenceFetched { result });
                },
                SessionAction::TouchPresence { user_id, last_seen_ms } => {
                    let events = self.backend.touch_presence(user_id, last_seen_ms);
                    self.inbox.extend(events);
                },
                SessionAction::InsertMessage { send_id, attempt, message } => {
                    let now_ms = self.env.wall_clock_ms();
                    let events = self.backend.insert_message(send_id, attempt, message, now_ms);
                    self.inbox.extend(events);
                },
                SessionAction::Broadcast { channel, broadcast } => {
                    self.backend.record_broadcast(channel, broadcast);
                },
                SessionAction::SetTimer { timer, after } => {
                    self.timers.insert(timer, (now + after, self.next_seq));
                    self.next_seq += 1;
                    self.timer_log.push(TimerRecord { at: now.elapsed(), timer, after });
                },
                SessionAction::CancelTimer { timer } => {
                    self.timers.remove(&timer);
                },
                SessionAction::Notify(notification) => self.notifications.push(notification),
                SessionAction::Render => self.renders += 1,
            }
        }
    }
}

/// Remote participants never collide with the session user.
fn remote_user(user: u8) -> UserId {
    UserId(100 + u64::from(user))
}
