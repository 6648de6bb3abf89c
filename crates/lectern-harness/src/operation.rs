//! Operations for randomized testing.
//!
//! Operations represent everything that can happen to a chat session: user
//! actions, environment signals, other participants and backend behavior
//! changes. They are generated by proptest and the fuzzer and applied to a
//! [`crate::SimDriver`], which checks invariants after every step.

use arbitrary::Arbitrary;

use crate::sim_backend::{ChannelBehavior, InsertBehavior};

/// Something that happens to a session.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// The view mounts (or re-runs initialize).
    Initialize,

    /// The user clicks the reconnect button.
    ManualReconnect,

    /// Explicit backoff reconnect.
    Reconnect,

    /// The view unmounts.
    Cleanup,

    /// The user sends a message.
    Send {
        /// Content seed.
        seed: u8,
    },

    /// The user types into the input.
    Type {
        /// Characters in the input after the keystroke.
        len: u8,
    },

    /// The user clears the input.
    ClearInput,

    /// The environment reports the network lost.
    GoOffline,

    /// The environment reports the network back.
    GoOnline,

    /// Simulated time passes.
    Advance {
        /// Milliseconds to advance.
        millis: u16,
    },

    /// Another participant posts.
    RemoteMessage {
        /// Participant (offset so it never collides with the session user).
        user: u8,
    },

    /// Another participant starts or stops typing.
    RemoteTyping {
        /// Participant.
        user: u8,
        /// Start or stop.
        start: bool,
    },

    /// The broker drops the current channel.
    DropChannel,

    /// Script the next channel open.
    ScriptChannel(ChannelBehavior),

    /// Script the next message insert.
    ScriptInsert(InsertBehavior),

    /// Toggle read failures.
    FailFetches(bool),

    /// Toggle presence upsert failures.
    FailTouches(bool),

    /// Deliver every held insert acknowledgement.
    ReleaseHungInserts,
}

impl Operation {
    /// Message content for a send seed.
    pub fn content(seed: u8) -> String {
        format!("message {seed}")
    }
}
