//! Connection lifecycle tests.
//!
//! Drive a session through subscribe, fallback, loss, backoff and recovery
//! against the scripted backend under virtual time. Invariants are checked
//! after every event.

use std::time::Duration;

use lectern_core::{
    ChannelId, ConnectionStatus, DeliveryMode, Identity, SessionAction, Timer, UserId,
};
use lectern_harness::{ChannelBehavior, InvariantRegistry, SimDriver};

const LIVE: ConnectionStatus = ConnectionStatus::Connected { mode: DeliveryMode::Realtime };
const POLLING: ConnectionStatus = ConnectionStatus::Connected { mode: DeliveryMode::Polling };

fn driver() -> SimDriver {
    SimDriver::new(Identity::new(UserId(1), "ada")).with_invariants(InvariantRegistry::standard())
}

fn live_driver() -> SimDriver {
    let mut driver = driver();
    driver.initialize();
    assert_eq!(driver.session().status(), LIVE);
    driver
}

/// INVARIANT: Repeated initialize never opens a second channel.
#[test]
fn initialize_is_idempotent() {
    let mut driver = live_driver();
    driver.initialize();
    driver.initialize();

    assert_eq!(driver.backend().opened().len(), 1);
    assert_eq!(driver.session().current_channel(), Some(ChannelId(1)));
}

#[test]
fn channel_name_carries_user_and_wall_clock() {
    let driver = live_driver();
    let (_, name) = &driver.backend().opened()[0];
    assert_eq!(name, &format!("chat:0000000000000001:{}", lectern_harness::SIM_EPOCH_MS));
}

#[test]
fn initial_fetches_run_alongside_the_subscription() {
    let driver = live_driver();
    let actions: Vec<_> = driver.history().iter().map(|(_, a)| a).collect();

    let fetch = actions.iter().position(|a| matches!(a, SessionAction::FetchMessages { .. }));
    let open = actions.iter().position(|a| matches!(a, SessionAction::OpenChannel { .. }));
    assert!(fetch < open, "history is fetched before the channel opens");
    assert_eq!(driver.backend().fetch_count(), 1);
    assert_eq!(driver.backend().presence_read_count(), 1);
}

/// INVARIANT: A channel that never confirms falls back to polling after
/// exactly the subscribe timeout.
#[test]
fn silent_channel_falls_back_to_polling() {
    let mut driver = driver();
    driver.backend_mut().script_channels([ChannelBehavior::Silent]);
    driver.initialize();
    assert_eq!(driver.session().status(), ConnectionStatus::Connecting);

    driver.advance(Duration::from_millis(9_999));
    assert_eq!(driver.session().status(), ConnectionStatus::Connecting);

    driver.advance(Duration::from_millis(1));
    assert_eq!(driver.session().status(), POLLING);
    assert_eq!(driver.session().current_channel(), None);

    driver.advance(Duration::from_millis(100));
    assert_eq!(driver.backend().released(), &[ChannelId(1)]);
}

#[test]
fn channel_error_while_connecting_falls_back_to_polling() {
    let mut driver = driver();
    driver.backend_mut().script_channels([ChannelBehavior::Error]);
    driver.initialize();

    assert_eq!(driver.session().status(), POLLING);
    assert_eq!(driver.session().reconnect_attempts(), 0);
}

/// INVARIANT: The close produced by our own unsubscribe never triggers a
/// reconnect.
#[test]
fn cleanup_then_close_is_ignored() {
    let mut driver = live_driver();
    driver.cleanup();
    assert_eq!(driver.session().status(), ConnectionStatus::Disconnected);

    driver.advance(Duration::from_millis(100));
    assert_eq!(driver.backend().released(), &[ChannelId(1)]);

    driver.advance(Duration::from_secs(120));
    assert_eq!(driver.session().status(), ConnectionStatus::Disconnected);
    assert_eq!(driver.backend().opened().len(), 1);
    assert!(driver.session().armed_timers().is_empty());
}

#[test]
fn unexpected_close_reconnects_with_backoff() {
    let mut driver = live_driver();
    driver.drop_channel();

    assert_eq!(driver.session().status(), ConnectionStatus::Reconnecting);
    assert_eq!(driver.remaining(Timer::Reconnect), Some(Duration::from_secs(2)));
    assert_eq!(driver.session().badge().label(), "Connecting…");

    driver.advance(Duration::from_secs(2));
    assert_eq!(driver.session().status(), LIVE);
    assert_eq!(driver.session().current_channel(), Some(ChannelId(2)));
}

/// INVARIANT: Retired channels are forgotten before they are released, so a
/// replacement never reacts to its predecessor.
#[test]
fn reconnect_releases_the_previous_channel() {
    let mut driver = live_driver();
    driver.drop_channel();
    driver.advance(Duration::from_secs(2));

    assert_eq!(driver.backend().released(), &[ChannelId(1)]);
    assert_eq!(driver.session().status(), LIVE);
}

/// INVARIANT: A realtime connection without liveness for over a minute is
/// replaced.
#[test]
fn stale_heartbeat_forces_reconnect() {
    let mut driver = live_driver();
    driver.backend_mut().set_fail_touches(true);

    driver.advance(Duration::from_secs(60));
    assert_eq!(driver.session().status(), LIVE);

    driver.advance(Duration::from_secs(30));
    assert_eq!(driver.session().status(), ConnectionStatus::Reconnecting);

    driver.backend_mut().set_fail_touches(false);
    driver.advance(Duration::from_secs(2));
    assert_eq!(driver.session().status(), LIVE);
}

#[test]
fn healthy_heartbeat_keeps_connection() {
    let mut driver = live_driver();
    driver.advance(Duration::from_secs(600));

    assert_eq!(driver.session().status(), LIVE);
    assert_eq!(driver.backend().opened().len(), 1);
    // One touch on subscribe, then one per heartbeat.
    assert_eq!(driver.backend().touch_count(), 21);
}

#[test]
fn remote_activity_counts_as_liveness() {
    let mut driver = live_driver();
    driver.backend_mut().set_fail_touches(true);

    for _ in 0..6 {
        driver.advance(Duration::from_secs(25));
        driver.remote_presence(UserId(7));
    }
    assert_eq!(driver.session().status(), LIVE);
}

#[test]
fn offline_disconnects_and_online_reconnects_immediately() {
    let mut driver = live_driver();
    driver.go_offline();

    assert_eq!(driver.session().status(), ConnectionStatus::Disconnected);
    assert!(!driver.session().armed_timers().contains(&Timer::Heartbeat));

    driver.advance(Duration::from_secs(5));
    assert_eq!(driver.backend().released(), &[ChannelId(1)]);

    driver.go_online();
    assert_eq!(driver.session().status(), LIVE);
    assert_eq!(driver.backend().opened().len(), 2);
}

#[test]
fn offline_cancels_pending_backoff() {
    let mut driver = live_driver();
    driver.drop_channel();
    driver.go_offline();

    assert_eq!(driver.session().status(), ConnectionStatus::Disconnected);
    driver.advance(Duration::from_secs(60));
    assert_eq!(driver.backend().opened().len(), 1);
}

#[test]
fn initialize_while_offline_waits_for_network() {
    let mut driver = driver();
    driver.go_offline();
    driver.initialize();

    assert!(driver.backend().opened().is_empty());
    assert_eq!(driver.session().status(), ConnectionStatus::Disconnected);

    driver.go_online();
    assert_eq!(driver.session().status(), LIVE);
}

#[test]
fn online_without_initialize_does_nothing() {
    let mut driver = driver();
    driver.go_offline();
    driver.go_online();

    assert!(driver.backend().opened().is_empty());
}

/// INVARIANT: Initialize-origin failures give up on realtime after three
/// outright failures and settle on polling.
#[test]
fn initial_budget_exhaustion_polls_as_last_resort() {
    let mut driver = driver();
    driver.backend_mut().set_default_channel(ChannelBehavior::Reject);
    driver.initialize();

    assert_eq!(driver.session().status(), ConnectionStatus::Reconnecting);
    assert_eq!(driver.session().reconnect_attempts(), 1);

    driver.advance(Duration::from_secs(4));
    assert_eq!(driver.session().reconnect_attempts(), 2);

    driver.advance(Duration::from_secs(8));
    assert_eq!(driver.session().status(), POLLING);
    assert_eq!(driver.session().reconnect_attempts(), 0);
    assert_eq!(driver.backend().opened().len(), 3);
}

/// INVARIANT: Reconnect delays double from two seconds and cap at thirty.
#[test]
fn reconnect_backoff_doubles_and_caps() {
    let mut driver = live_driver();
    driver.backend_mut().set_default_channel(ChannelBehavior::Reject);
    driver.drop_channel();

    for _ in 0..12 {
        driver.advance(Duration::from_secs(30));
    }

    let delays: Vec<u64> =
        driver.armed_delays(Timer::Reconnect).iter().map(|d| d.as_secs()).collect();
    assert_eq!(delays, vec![2, 4, 8, 16, 30, 30, 30, 30, 30, 30]);
}

/// INVARIANT: Reconnect-origin failures end in `Failed` after ten attempts and
/// stay there until the user intervenes.
#[test]
fn reconnect_budget_exhaustion_fails_until_manual_reconnect() {
    let mut driver = live_driver();
    driver.backend_mut().set_default_channel(ChannelBehavior::Reject);
    driver.drop_channel();

    for _ in 0..12 {
        driver.advance(Duration::from_secs(30));
    }
    assert_eq!(driver.session().status(), ConnectionStatus::Failed);
    assert_eq!(driver.session().reconnect_attempts(), 10);
    assert_eq!(driver.session().badge().label(), "Disconnected (attempt 10)");

    let opened = driver.backend().opened().len();
    driver.advance(Duration::from_secs(300));
    assert_eq!(driver.backend().opened().len(), opened);

    driver.backend_mut().set_default_channel(ChannelBehavior::Subscribe);
    driver.manual_reconnect();
    assert_eq!(driver.session().status(), LIVE);
    assert_eq!(driver.session().badge().label(), "Live");
}

/// INVARIANT: Coming back online after the budget ran out starts a fresh
/// reconnect sequence instead of a single try past the ceiling.
#[test]
fn online_after_failed_restarts_the_reconnect_budget() {
    let mut driver = live_driver();
    driver.backend_mut().set_default_channel(ChannelBehavior::Reject);
    driver.drop_channel();
    for _ in 0..12 {
        driver.advance(Duration::from_secs(30));
    }
    assert_eq!(driver.session().status(), ConnectionStatus::Failed);
    let opened = driver.backend().opened().len();

    driver.go_offline();
    driver.go_online();
    assert_eq!(driver.session().status(), ConnectionStatus::Reconnecting);
    assert_eq!(driver.session().reconnect_attempts(), 1);
    assert_eq!(driver.session().badge().label(), "Connecting… (attempt 1)");
    assert_eq!(driver.backend().opened().len(), opened + 1);

    driver.backend_mut().set_default_channel(ChannelBehavior::Subscribe);
    driver.advance(Duration::from_secs(4));
    assert_eq!(driver.session().status(), LIVE);
    assert_eq!(driver.session().reconnect_attempts(), 0);
}

#[test]
fn manual_reconnect_replaces_a_live_channel() {
    let mut driver = live_driver();
    driver.manual_reconnect();

    assert_eq!(driver.session().status(), LIVE);
    assert_eq!(driver.session().current_channel(), Some(ChannelId(2)));

    driver.advance(Duration::from_millis(100));
    assert_eq!(driver.backend().released(), &[ChannelId(1)]);
}

#[test]
fn explicit_reconnect_is_ignored_while_connected() {
    let mut driver = live_driver();
    driver.reconnect();

    assert_eq!(driver.session().status(), LIVE);
    assert!(!driver.session().armed_timers().contains(&Timer::Reconnect));
}

#[test]
fn polling_recovers_to_realtime_on_manual_reconnect() {
    let mut driver = driver();
    driver.backend_mut().script_channels([ChannelBehavior::Error]);
    driver.initialize();
    assert_eq!(driver.session().status(), POLLING);

    driver.manual_reconnect();
    assert_eq!(driver.session().status(), LIVE);
    assert!(!driver.session().armed_timers().contains(&Timer::PollMessages));
}

#[test]
fn badge_follows_status() {
    let mut driver = driver();
    assert_eq!(driver.session().badge().label(), "Disconnected");

    driver.backend_mut().script_channels([ChannelBehavior::Silent]);
    driver.initialize();
    assert_eq!(driver.session().badge().label(), "Connecting…");

    driver.advance(Duration::from_secs(10));
    assert_eq!(driver.session().badge().label(), "Polling");
}
