//! Lectern core
//!
//! Sans-IO connection manager for a course chat room. Keeps a chat view
//! delivering messages over a degrading network: realtime subscription with a
//! bounded timeout, fallback to polling, exponential backoff reconnects,
//! heartbeat staleness detection, optimistic sends with bounded retries, and
//! typing indicators.
//!
//! # Architecture
//!
//! [`ChatSession`] receives [`SessionEvent`]s (broker callbacks, row store
//! completions, timer fires, network signals) and user operations, and returns
//! [`SessionAction`]s for a driver to execute. It performs no I/O and never
//! sleeps; time is read through [`Environment`], and all scheduled work is
//! expressed as named [`Timer`]s. The same session runs unchanged under the
//! deterministic simulation harness and the tokio runtime.
//!
//! # Components
//!
//! - [`ChatSession`]: the state machine
//! - [`ConnectionStatus`]: tagged connection status, with [`ConnectionBadge`]
//! - [`MessageLog`]: merged, de-duplicated message list
//! - [`PresenceBook`]: recency-window presence
//! - [`TypingIndicators`]: remote typing set with expiry
//! - [`SessionConfig`]: timings and retry budgets

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod channel;
mod config;
mod env;
mod error;
mod event;
mod identity;
mod message;
mod presence;
mod session;
mod status;
mod timer;
mod typing;

pub use channel::{Broadcast, CHAT_EVENT_CLASSES, ChannelId, ChannelStatus, EventClass, channel_name};
pub use config::{
    DEFAULT_CHANNEL_RELEASE_DELAY, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_STALE_AFTER,
    DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_INITIAL_ATTEMPTS, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_MAX_SEND_RETRIES, DEFAULT_POLL_MESSAGES_EVERY, DEFAULT_POLL_PRESENCE_EVERY,
    DEFAULT_PRESENCE_WINDOW, DEFAULT_RECONNECT_BASE, DEFAULT_RECONNECT_CAP,
    DEFAULT_REFRESH_ONLINE_EVERY, DEFAULT_SEND_RETRY_BASE, DEFAULT_SEND_TIMEOUT,
    DEFAULT_SUBSCRIBE_TIMEOUT, DEFAULT_TYPING_EXPIRY, DEFAULT_TYPING_IDLE, SessionConfig,
};
pub use env::Environment;
pub use error::{BackendError, ConfigError};
pub use event::{Notification, SessionAction, SessionEvent};
pub use identity::{Author, Identity, UserId};
pub use message::{Message, MessageId, MessageLog, NewMessage, SendId, StoredMessage};
pub use presence::{PresenceBook, PresenceEntry};
pub use session::{ChatSession, SessionSnapshot};
pub use status::{BadgeKind, ConnectionBadge, ConnectionStatus, DeliveryMode};
pub use timer::Timer;
pub use typing::{TypingBurst, TypingIndicators};
