//! Lectern app
//!
//! Runs a [`lectern_core::ChatSession`] on tokio. The [`Runtime`] executes the
//! session's actions against a backend that implements [`RowStore`] and
//! [`Realtime`], arms its timers on the tokio clock, and publishes a
//! [`ChatView`] for the frontend after every render.
//!
//! [`MemoryBackend`] is an in-process backend shared by several runtimes. It
//! fans row inserts and broadcasts out to every open channel and can be made
//! unavailable or realtime-less to exercise the degraded paths.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod backend;
mod command;
mod error;
mod memory;
mod runtime;
mod system_env;
mod view;

pub use backend::{ChannelEvent, ChannelSink, Realtime, RealtimeChannel, RowStore};
pub use command::Command;
pub use error::RuntimeError;
pub use memory::{MemoryBackend, MemoryChannel};
pub use runtime::{Runtime, RuntimeHandle};
pub use system_env::SystemEnv;
pub use view::ChatView;
