//! Fuzz target for random operation sequences against the simulated session
//!
//! # Strategy
//!
//! - Operations: user actions, network signals, remote participants, broker
//!   drops and scripted backend behavior, in any order
//! - Time: arbitrary advances so timers interleave with everything else
//!
//! # Invariants
//!
//! - Every standard session invariant holds after every step
//! - NEVER panic, whatever the order of events

#![no_main]

use lectern_core::{Identity, UserId};
use lectern_harness::{InvariantRegistry, Operation, SimDriver};
use libfuzzer_sys::fuzz_target;

/// Cap on operations per input
const MAX_OPERATIONS: usize = 256;

fuzz_target!(|operations: Vec<Operation>| {
    let mut driver = SimDriver::new(Identity::new(UserId(1), "fuzz"))
        .with_invariants(InvariantRegistry::standard());

    for operation in operations.iter().take(MAX_OPERATIONS) {
        driver.apply(operation);
    }
});
