//! Seeded chaos runs.
//!
//! The backend fails reads, inserts, presence upserts and channel opens at
//! random. Runs are reproducible from their seed.

use std::time::Duration;

use lectern_core::{ConnectionStatus, DeliveryMode, Identity, Notification, UserId};
use lectern_harness::{ChaosConfig, InvariantRegistry, SimDriver};

const LIVE: ConnectionStatus = ConnectionStatus::Connected { mode: DeliveryMode::Realtime };

/// Drive a chatty session for ten simulated minutes under chaos.
fn chaotic_run(seed: u64, rate: f64) -> SimDriver {
    let mut driver = SimDriver::new(Identity::new(UserId(1), "ada"))
        .with_invariants(InvariantRegistry::standard());
    driver.backend_mut().set_chaos(ChaosConfig::uniform(seed, rate));
    driver.initialize();

    for step in 0..300u64 {
        match step % 6 {
            0 => driver.send(&format!("message {step}")),
            1 => driver.type_text("typing"),
            2 => driver.remote_message(UserId(7), &format!("remote {step}")),
            3 => driver.remote_typing(UserId(8), true),
            4 if step % 60 == 4 => driver.drop_channel(),
            _ => {},
        }
        driver.advance(Duration::from_millis(2_000));
    }
    driver
}

/// INVARIANT: Under random backend failures every send ends either stored
/// exactly once or abandoned with a notification.
#[test]
fn chaos_sends_resolve() {
    for seed in 0..16 {
        let mut driver = chaotic_run(seed, 0.2);
        assert!(driver.backend().chaos_injected() > 0, "seed {seed} injected nothing");

        driver.backend_mut().set_chaos(ChaosConfig::calm(seed));
        driver.manual_reconnect();
        driver.advance(Duration::from_secs(60));
        assert_eq!(driver.session().status(), LIVE, "seed {seed}");

        let snapshot = driver.session().snapshot();
        assert!(snapshot.in_flight_sends.is_empty(), "seed {seed}");
        assert!(snapshot.retrying_sends.is_empty(), "seed {seed}");

        for step in (0..300u64).step_by(6) {
            let content = format!("message {step}");
            let stored = driver.backend().messages().iter().filter(|m| m.content == content).count();
            let abandoned = driver
                .notifications()
                .iter()
                .any(|n| matches!(n, Notification::SendFailed { content: c } if *c == content));
            assert!(
                (stored == 1 && !abandoned) || (stored == 0 && abandoned),
                "seed {seed}: {content:?} stored {stored} times, abandoned={abandoned}"
            );
        }
    }
}

/// INVARIANT: Same seed, same run.
#[test]
fn chaos_is_deterministic() {
    let first = chaotic_run(42, 0.3);
    let second = chaotic_run(42, 0.3);

    assert_eq!(first.history(), second.history());
    assert_eq!(first.backend().chaos_injected(), second.backend().chaos_injected());
}

#[test]
fn heavy_chaos_keeps_invariants() {
    for seed in 100..104 {
        let driver = chaotic_run(seed, 0.6);
        assert!(driver.backend().opened().len() > 1, "seed {seed}");
    }
}
