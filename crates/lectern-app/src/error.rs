//! Runtime error types.

use lectern_core::ConfigError;
use thiserror::Error;

/// Errors surfaced by the runtime.
///
/// Backend failures never appear here: they are reported to the session as
/// events and handled there.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The session configuration is invalid.
    #[error("invalid session config: {0}")]
    Config(#[from] ConfigError),

    /// The runtime has stopped and no longer accepts commands.
    #[error("runtime stopped")]
    Stopped,
}
