//! Deterministic simulation harness for the lectern chat session.
//!
//! The session core is sans-IO, so the harness drives it with a virtual clock
//! ([`SimEnv`]) and a scripted in-memory backend ([`SimBackend`]). Every
//! action the session emits is executed immediately and timers fire in
//! deadline order, which makes each run reproducible down to the millisecond.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. Use [`InvariantRegistry::standard()`] for every session
//! invariant.
//!
//! # Randomized Testing
//!
//! [`Operation`] enumerates everything that can happen to a session. Proptest
//! and the fuzzer generate operation sequences and apply them through
//! [`SimDriver::apply`]. [`Chaos`] injects seeded backend failures.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chaos;
pub mod invariants;
pub mod operation;
pub mod sim_backend;
pub mod sim_driver;
pub mod sim_env;

pub use chaos::{Chaos, ChaosConfig, ChaosTarget};
pub use invariants::{
    ChannelMatchesStatus, ConnectedHasNoAttempts, HeartbeatMatchesMode, Invariant,
    InvariantRegistry, InvariantResult, PendingMatchesOutbox, PollersMatchMode,
    ReconnectTimerMatchesStatus, SessionSnapshot, UniqueMessages, Violation,
};
pub use operation::Operation;
pub use sim_backend::{ChannelBehavior, HungInsert, InsertBehavior, SimBackend};
pub use sim_driver::{SimDriver, TimerRecord};
pub use sim_env::{SIM_EPOCH_MS, SimEnv, SimInstant};
