//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties that must always hold during session execution.
//! Unlike example-based tests that check specific scenarios, invariants
//! verify behavioral properties across all possible execution paths.
//!
//! # Architecture
//!
//! The session exposes its internals as a [`SessionSnapshot`]. Registered
//! [`Invariant`] checks run against that snapshot after every step the
//! [`crate::SimDriver`] takes. Violations panic with the step that caused
//! them.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! registry.check_all(&session.snapshot())?;
//! ```

mod checks;

pub use checks::{
    ChannelMatchesStatus, ConnectedHasNoAttempts, HeartbeatMatchesMode, PendingMatchesOutbox,
    PollersMatchMode, ReconnectTimerMatchesStatus, UniqueMessages,
};
pub use lectern_core::SessionSnapshot;

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// An invariant that can be checked against session state.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against a snapshot.
    ///
    /// Returns `Ok(())` if the invariant holds, or a [`Violation`]
    /// describing what went wrong.
    fn check(&self, state: &SessionSnapshot) -> InvariantResult;

    /// Shorthand for building a violation of this invariant.
    fn violation(&self, message: String) -> Violation {
        Violation { invariant: self.name(), message }
    }
}

/// Registry of invariants to check.
///
/// Use [`InvariantRegistry::standard()`] for every session invariant.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Create a registry with every standard session invariant.
    ///
    /// Includes:
    /// - [`ConnectedHasNoAttempts`]: the attempt counter is zero while connected
    /// - [`PollersMatchMode`]: poll timers run exactly while polling
    /// - [`HeartbeatMatchesMode`]: the heartbeat runs exactly while realtime
    /// - [`ChannelMatchesStatus`]: a current channel exists exactly while one
    ///   is needed
    /// - [`ReconnectTimerMatchesStatus`]: a backoff timer exists exactly while
    ///   reconnecting
    /// - [`UniqueMessages`]: stored IDs are unique and pending entries trail
    /// - [`PendingMatchesOutbox`]: pending entries mirror in-flight sends
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(ConnectedHasNoAttempts);
        registry.add(PollersMatchMode);
        registry.add(HeartbeatMatchesMode);
        registry.add(ChannelMatchesStatus);
        registry.add(ReconnectTimerMatchesStatus);
        registry.add(UniqueMessages);
        registry.add(PendingMatchesOutbox);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, state: &SessionSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking on violation.
    ///
    /// Use this in tests where you want immediate failure with context.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SessionSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}\n{state:#?}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use lectern_core::ConnectionStatus;

    use super::*;

    fn idle() -> SessionSnapshot {
        SessionSnapshot {
            status: ConnectionStatus::Disconnected,
            reconnect_attempts: 0,
            current_channel: None,
            armed_timers: Vec::new(),
            message_ids: Vec::new(),
            in_flight_sends: Vec::new(),
            retrying_sends: Vec::new(),
        }
    }

    #[test]
    fn standard_registry_has_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(!registry.is_empty());
        assert_eq!(registry.len(), 7);
    }

    #[test]
    fn idle_snapshot_passes_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(registry.check_all(&idle()).is_ok());
    }
}
