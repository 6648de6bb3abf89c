//! Fuzz target for out-of-order and stray backend events
//!
//! Real brokers deliver late callbacks for retired channels, acknowledgements
//! for sends that were already given up on, and timers that race their own
//! cancellation. This target injects such events directly into a session
//! that is otherwise driven normally.
//!
//! # Strategy
//!
//! - Channel callbacks: status changes and deliveries tagged with any channel
//!   ID, current or retired
//! - Completions: fetch, touch and insert results for arbitrary sends and
//!   attempts, successful or failed
//! - Timers: fires for any timer key, armed or not
//!
//! # Invariants
//!
//! - Every standard session invariant holds after every injected event
//! - Stray events never panic

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use lectern_core::{
    BackendError, Broadcast, ChannelId, ChannelStatus, Identity, PresenceEntry, SendId,
    SessionEvent, StoredMessage, Timer, UserId,
};
use lectern_harness::{InvariantRegistry, SimDriver, SIM_EPOCH_MS};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum Step {
    Initialize,
    Send { seed: u8 },
    Advance { millis: u16 },
    Inject(Stray),
}

#[derive(Debug, Clone, Arbitrary)]
enum Stray {
    Status { channel: u8, status: u8 },
    OpenFailed { channel: u8 },
    Inserted { channel: u8, row: u8, user: u8 },
    Presence { channel: u8, user: u8, age_secs: u8 },
    Typing { channel: u8, user: u8, start: bool },
    Sync { channel: u8 },
    Fetched { rows: Vec<u8>, fail: bool },
    Touched { fail: bool },
    InsertDone { send: u8, attempt: u8, row: Option<u8> },
    Timer { key: u8, id: u8 },
    Online(bool),
}

fn row(id: u8, user: u8) -> StoredMessage {
    StoredMessage {
        id: u64::from(id),
        content: format!("row {id}"),
        created_at_ms: SIM_EPOCH_MS + u64::from(id),
        user_id: UserId(u64::from(user)),
        author: None,
    }
}

fn timer(key: u8, id: u8) -> Timer {
    let channel = ChannelId(u64::from(id));
    let send = SendId(u64::from(id));
    match key % 11 {
        0 => Timer::SubscribeTimeout(channel),
        1 => Timer::Heartbeat,
        2 => Timer::PollMessages,
        3 => Timer::PollPresence,
        4 => Timer::RefreshOnline,
        5 => Timer::Reconnect,
        6 => Timer::ReleaseChannel(channel),
        7 => Timer::SendTimeout(send),
        8 => Timer::SendRetry(send),
        9 => Timer::TypingIdle,
        _ => Timer::TypingExpiry,
    }
}

fn event(stray: Stray) -> SessionEvent {
    let network = || BackendError::Network("injected".into());
    match stray {
        Stray::Status { channel, status } => SessionEvent::ChannelStatus {
            channel: ChannelId(u64::from(channel)),
            status: match status % 4 {
                0 => ChannelStatus::Subscribed,
                1 => ChannelStatus::ChannelError("injected".into()),
                2 => ChannelStatus::TimedOut,
                _ => ChannelStatus::Closed,
            },
        },
        Stray::OpenFailed { channel } => SessionEvent::ChannelOpenFailed {
            channel: ChannelId(u64::from(channel)),
            error: network(),
        },
        Stray::Inserted { channel, row: id, user } => SessionEvent::MessageInserted {
            channel: ChannelId(u64::from(channel)),
            message: row(id, user),
        },
        Stray::Presence { channel, user, age_secs } => SessionEvent::PresenceChanged {
            channel: ChannelId(u64::from(channel)),
            entry: PresenceEntry {
                user_id: UserId(u64::from(user)),
                last_seen_ms: SIM_EPOCH_MS.saturating_sub(u64::from(age_secs) * 1_000),
            },
        },
        Stray::Typing { channel, user, start } => {
            let user_id = UserId(u64::from(user));
            SessionEvent::Broadcast {
                channel: ChannelId(u64::from(channel)),
                broadcast: if start {
                    Broadcast::TypingStart { user_id }
                } else {
                    Broadcast::TypingStop { user_id }
                },
            }
        },
        Stray::Sync { channel } => SessionEvent::PresenceSync { channel: ChannelId(u64::from(channel)) },
        Stray::Fetched { rows, fail } => SessionEvent::MessagesFetched {
            result: if fail {
                Err(network())
            } else {
                Ok(rows.iter().map(|id| row(*id, id % 4)).collect())
            },
        },
        Stray::Touched { fail } => SessionEvent::PresenceTouched {
            result: if fail { Err(network()) } else { Ok(()) },
        },
        Stray::InsertDone { send, attempt, row: stored } => SessionEvent::InsertCompleted {
            send_id: SendId(u64::from(send % 8)),
            attempt: u32::from(attempt % 6),
            result: stored.map(|id| row(id, 1)).ok_or_else(network),
        },
        Stray::Timer { key, id } => SessionEvent::TimerFired(timer(key, id % 8)),
        Stray::Online(true) => SessionEvent::NetworkOnline,
        Stray::Online(false) => SessionEvent::NetworkOffline,
    }
}

fuzz_target!(|steps: Vec<Step>| {
    let mut driver = SimDriver::new(Identity::new(UserId(1), "fuzz"))
        .with_invariants(InvariantRegistry::standard());

    for step in steps.into_iter().take(256) {
        match step {
            Step::Initialize => driver.initialize(),
            Step::Send { seed } => driver.send(&format!("message {seed}")),
            Step::Advance { millis } => driver.advance(Duration::from_millis(u64::from(millis))),
            Step::Inject(stray) => driver.deliver([event(stray)]),
        }
    }
});
