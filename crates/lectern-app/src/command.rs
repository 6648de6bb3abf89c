//! Commands from the frontend to the runtime.

/// Input from the user interface or the host environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// The input text changed (one keystroke).
    Input(String),
    /// Send a message.
    Send(String),
    /// Manual reconnect.
    Reconnect,
    /// The host regained network connectivity.
    NetworkOnline,
    /// The host lost network connectivity.
    NetworkOffline,
    /// Tear the session down and stop the runtime.
    Shutdown,
}
