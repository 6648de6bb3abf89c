//! Generic runtime for the chat session.
//!
//! The Runtime executes [`SessionAction`]s against a backend and feeds the
//! results back into the [`ChatSession`]:
//! - Row store calls and channel opens run as spawned tasks that report back
//!   through an inbox
//! - Timers live in a keyed table; the loop sleeps until the earliest one
//! - Channel handles are kept per [`ChannelId`] so releases and broadcasts
//!   reach the right channel
//!
//! The frontend drives the runtime with [`Command`]s and watches a
//! [`ChatView`] that is republished on every render.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::Duration,
};

use lectern_core::{
    BackendError, ChannelId, ChatSession, Environment, Identity, SessionAction, SessionConfig,
    SessionEvent, Timer,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    backend::{ChannelSink, Realtime, RealtimeChannel, RowStore},
    command::Command,
    error::RuntimeError,
    view::ChatView,
};

/// Upper bound on waiting for in-flight backend calls at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Result of a channel open task.
type OpenOutcome<C> = (ChannelId, Result<C, BackendError>);

/// Frontend side of a runtime.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<ChatView>,
}

impl RuntimeHandle {
    /// Send a command to the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Stopped`] once the runtime has exited.
    pub fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.commands.send(command).map_err(|_| RuntimeError::Stopped)
    }

    /// Latest published view.
    pub fn view(&self) -> ChatView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every render.
    pub fn subscribe(&self) -> watch::Receiver<ChatView> {
        self.view.clone()
    }
}

/// Runtime that owns a [`ChatSession`] and executes its actions.
///
/// # Type Parameters
///
/// - `B`: Backend providing the row store and the realtime broker
/// - `E`: Environment for the session clock
pub struct Runtime<B, E>
where
    B: RowStore + Realtime,
    E: Environment,
{
    session: ChatSession<E>,
    backend: B,
    identity: Option<Identity>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    opened_tx: mpsc::UnboundedSender<OpenOutcome<B::Channel>>,
    opened_rx: mpsc::UnboundedReceiver<OpenOutcome<B::Channel>>,
    /// Armed timers with `(deadline, arm sequence)`.
    timers: BTreeMap<Timer, (Instant, u64)>,
    next_seq: u64,
    channels: HashMap<ChannelId, B::Channel>,
    /// Channels released before their open completed. Cleared when the open
    /// finishes either way.
    released: HashSet<ChannelId>,
    tasks: JoinSet<()>,
    view: watch::Sender<ChatView>,
}

impl<B, E> Runtime<B, E>
where
    B: RowStore + Realtime,
    E: Environment,
{
    /// Create a runtime for `identity` and the handle that controls it.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Config`] if `config` fails validation.
    pub fn new(
        backend: B,
        env: E,
        identity: Identity,
        config: SessionConfig,
    ) -> Result<(Self, RuntimeHandle), RuntimeError> {
        config.validate()?;

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        let (view, view_rx) = watch::channel(ChatView::default());

        let runtime = Self {
            session: ChatSession::new(env, config),
            backend,
            identity: Some(identity),
            commands,
            events_tx,
            events_rx,
            opened_tx,
            opened_rx,
            timers: BTreeMap::new(),
            next_seq: 0,
            channels: HashMap::new(),
            released: HashSet::new(),
            tasks: JoinSet::new(),
            view,
        };
        let handle = RuntimeHandle { commands: commands_tx, view: view_rx };
        Ok((runtime, handle))
    }

    /// Run until [`Command::Shutdown`] or until every handle is dropped.
    ///
    /// Initializes the session on entry. On exit the session is cleaned up
    /// and every channel is released without the usual deferral.
    pub async fn run(mut self) -> Result<(), RuntimeError> {
        let identity = self.identity.take();
        let mut actions = self.session.set_identity(identity);
        actions.extend(self.session.initialize());
        self.execute(actions);
        self.publish();
        info!("chat runtime started");

        loop {
            let next = self.next_timer();
            tokio::select! {
                biased;

                Some((channel, outcome)) = self.opened_rx.recv() => {
                    self.on_open_completed(channel, outcome);
                },
                Some(event) = self.events_rx.recv() => {
                    let actions = self.session.handle(event);
                    self.execute(actions);
                },
                timer = wait_for(next) => {
                    self.timers.remove(&timer);
                    let actions = self.session.handle(SessionEvent::TimerFired(timer));
                    self.execute(actions);
                },
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.on_command(command) {
                        break;
                    }
                },
                Some(_) = self.tasks.join_next(), if !self.tasks.is_empty() => {},
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Returns `false` when the runtime should stop.
    fn on_command(&mut self, command: Command) -> bool {
        let actions = match command {
            Command::Input(text) => self.session.input_changed(text),
            Command::Send(content) => self.session.send_message(content),
            Command::Reconnect => self.session.manual_reconnect(),
            Command::NetworkOnline => self.session.handle(SessionEvent::NetworkOnline),
            Command::NetworkOffline => self.session.handle(SessionEvent::NetworkOffline),
            Command::Shutdown => return false,
        };
        self.execute(actions);
        true
    }

    fn on_open_completed(
        &mut self,
        channel: ChannelId,
        outcome: Result<B::Channel, BackendError>,
    ) {
        let released = self.released.remove(&channel);
        match outcome {
            Ok(handle) if released => {
                debug!(%channel, "channel opened after release, closing");
                self.spawn_unsubscribe(handle);
            },
            Ok(handle) => {
                self.channels.insert(channel, handle);
            },
            Err(error) => {
                let event = SessionEvent::ChannelOpenFailed { channel, error };
                let actions = self.session.handle(event);
                self.execute(actions);
            },
        }
    }

    fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::OpenChannel { channel, name } => self.open_channel(channel, name),
                SessionAction::ReleaseChannel { channel } => self.release_channel(channel),
                SessionAction::FetchMessages { since_ms, limit } => {
                    let backend = self.backend.clone();
                    let events = self.events_tx.clone();
                    self.tasks.spawn(async move {
                        let result = backend.select_messages(since_ms, limit).await;
                        let _ = events.send(SessionEvent::MessagesFetched { result });
                    });
                },
                SessionAction::FetchPresence { active_since_ms } => {
                    let backend = self.backend.clone();
                    let events = self.events_tx.clone();
                    self.tasks.spawn(async move {
                        let result = backend.select_presence(active_since_ms).await;
                        let _ = events.send(SessionEvent::PresenceFetched { result });
                    });
                },
                SessionAction::TouchPresence { user_id, last_seen_ms } => {
                    let backend = self.backend.clone();
                    let events = self.events_tx.clone();
                    self.tasks.spawn(async move {
                        let result = backend.touch_presence(user_id, last_seen_ms).await;
                        let _ = events.send(SessionEvent::PresenceTouched { result });
                    });
                },
                SessionAction::InsertMessage { send_id, attempt, message } => {
                    let backend = self.backend.clone();
                    let events = self.events_tx.clone();
                    self.tasks.spawn(async move {
                        let result = backend.insert_message(message).await;
                        let _ = events.send(SessionEvent::InsertCompleted { send_id, attempt, result });
                    });
                },
                SessionAction::Broadcast { channel, broadcast } => {
                    let Some(handle) = self.channels.get(&channel).cloned() else {
                        debug!(%channel, event = broadcast.event_name(), "no handle, broadcast dropped");
                        continue;
                    };
                    self.tasks.spawn(async move {
                        if let Err(error) = handle.send(broadcast).await {
                            warn!(%channel, %error, "broadcast failed");
                        }
                    });
                },
                SessionAction::SetTimer { timer, after } => {
                    self.timers.insert(timer, (Instant::now() + after, self.next_seq));
                    self.next_seq += 1;
                },
                SessionAction::CancelTimer { timer } => {
                    self.timers.remove(&timer);
                },
                SessionAction::Notify(notification) => {
                    info!(?notification, "user notification");
                },
                SessionAction::Render => self.publish(),
            }
        }
    }

    fn open_channel(&mut self, channel: ChannelId, name: String) {
        let backend = self.backend.clone();
        let sink = ChannelSink::new(channel, self.events_tx.clone());
        let opened = self.opened_tx.clone();
        self.tasks.spawn(async move {
            let outcome = backend.subscribe(&name, sink).await;
            let _ = opened.send((channel, outcome));
        });
    }

    fn release_channel(&mut self, channel: ChannelId) {
        match self.channels.remove(&channel) {
            Some(handle) => self.spawn_unsubscribe(handle),
            // Open still in flight; close the handle when it arrives.
            None => {
                self.released.insert(channel);
            },
        }
    }

    fn spawn_unsubscribe(&mut self, handle: B::Channel) {
        self.tasks.spawn(async move { handle.unsubscribe().await });
    }

    fn next_timer(&self) -> Option<(Timer, Instant)> {
        self.timers
            .iter()
            .min_by_key(|(_, (deadline, seq))| (*deadline, *seq))
            .map(|(timer, (deadline, _))| (*timer, *deadline))
    }

    fn publish(&self) {
        self.view.send_replace(ChatView::capture(&self.session));
    }

    async fn shutdown(mut self) {
        let actions = self.session.cleanup();
        self.execute(actions);

        let releases: Vec<Timer> = self.timers.keys().copied().filter(|t| t.is_release()).collect();
        for timer in releases {
            self.timers.remove(&timer);
            let actions = self.session.handle(SessionEvent::TimerFired(timer));
            self.execute(actions);
        }
        for (_, handle) in std::mem::take(&mut self.channels) {
            self.spawn_unsubscribe(handle);
        }

        let drain = async {
            while self.tasks.join_next().await.is_some() {}
            // Opens that completed after their release.
            while let Ok((channel, outcome)) = self.opened_rx.try_recv() {
                if let Ok(handle) = outcome {
                    debug!(%channel, "closing channel opened during shutdown");
                    handle.unsubscribe().await;
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(remaining = self.tasks.len(), "backend calls still running at shutdown");
        }
        self.publish();
        info!("chat runtime stopped");
    }
}

/// Sleep until the next timer is due. Never completes without one.
async fn wait_for(next: Option<(Timer, Instant)>) -> Timer {
    match next {
        Some((timer, deadline)) => {
            tokio::time::sleep_until(deadline).await;
            timer
        },
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lectern_core::UserId;

    use super::*;
    use crate::{MemoryBackend, SystemEnv};

    fn runtime() -> Runtime<MemoryBackend<SystemEnv>, SystemEnv> {
        let env = SystemEnv::anchored_at(1_700_000_000_000);
        let identity = Identity::new(UserId(1), "ada");
        let (runtime, _handle) =
            Runtime::new(MemoryBackend::new(env), env, identity, SessionConfig::default()).unwrap();
        runtime
    }

    #[tokio::test(start_paused = true)]
    async fn failed_open_clears_its_pending_release() {
        let mut runtime = runtime();
        runtime.release_channel(ChannelId(1));
        assert!(runtime.released.contains(&ChannelId(1)));

        runtime.on_open_completed(ChannelId(1), Err(BackendError::Network("refused".into())));

        assert!(runtime.released.is_empty());
        assert!(runtime.channels.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn open_after_release_is_closed_and_forgotten() {
        let env = SystemEnv::anchored_at(1_700_000_000_000);
        let backend = MemoryBackend::new(env);
        let mut runtime = runtime();
        let (events, _rx) = mpsc::unbounded_channel();
        let sink = ChannelSink::new(ChannelId(1), events);
        let handle = backend.subscribe("chat:1:0", sink).await.unwrap();
        assert_eq!(backend.open_channels().len(), 1);

        runtime.release_channel(ChannelId(1));
        runtime.on_open_completed(ChannelId(1), Ok(handle));
        while runtime.tasks.join_next().await.is_some() {}

        assert!(runtime.released.is_empty());
        assert!(runtime.channels.is_empty());
        assert!(backend.open_channels().is_empty());
    }
}
