//! Typing indicator, presence and polling cadence tests.

use std::time::Duration;

use lectern_core::{Broadcast, ConnectionStatus, DeliveryMode, Identity, UserId};
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

fn polling_driver() -> SimDriver {
    let mut driver = driver();
    driver.backend_mut().script_channels([ChannelBehavior::Silent]);
    driver.initialize();
    driver.advance(Duration::from_secs(10));
    assert_eq!(driver.session().status(), POLLING);
    driver
}

fn sent_broadcasts(driver: &SimDriver) -> Vec<Broadcast> {
    driver.backend().broadcasts().iter().map(|(_, b)| *b).collect()
}

const START: Broadcast = Broadcast::TypingStart { user_id: UserId(1) };
const STOP: Broadcast = Broadcast::TypingStop { user_id: UserId(1) };

/// INVARIANT: One typing_start per burst, and the burst ends after two
/// seconds without input.
#[test]
fn typing_stops_after_idle() {
    let mut driver = live_driver();
    driver.type_text("h");
    driver.advance(Duration::from_millis(500));
    driver.type_text("he");
    assert_eq!(sent_broadcasts(&driver), vec![START]);

    driver.advance(Duration::from_millis(1_900));
    assert_eq!(sent_broadcasts(&driver), vec![START]);

    driver.advance(Duration::from_millis(100));
    assert_eq!(sent_broadcasts(&driver), vec![START, STOP]);
}

#[test]
fn clearing_input_stops_typing_at_once() {
    let mut driver = live_driver();
    driver.type_text("h");
    driver.type_text("");

    assert_eq!(sent_broadcasts(&driver), vec![START, STOP]);
    driver.advance(Duration::from_secs(5));
    assert_eq!(sent_broadcasts(&driver).len(), 2);
}

#[test]
fn sending_ends_the_burst() {
    let mut driver = live_driver();
    driver.type_text("hello");
    driver.send("hello");

    assert_eq!(sent_broadcasts(&driver), vec![START, STOP]);
}

#[test]
fn typing_is_not_broadcast_while_polling() {
    let mut driver = polling_driver();
    driver.type_text("hello");
    driver.advance(Duration::from_secs(3));

    assert!(driver.backend().broadcasts().is_empty());
}

/// INVARIANT: Remote typing indicators expire two seconds after the last
/// start.
#[test]
fn remote_typing_expires() {
    let mut driver = live_driver();
    driver.remote_typing(UserId(7), true);
    assert_eq!(driver.session().typing_users(), vec![UserId(7)]);

    driver.advance(Duration::from_millis(1_000));
    driver.remote_typing(UserId(8), true);
    driver.advance(Duration::from_millis(1_000));
    assert_eq!(driver.session().typing_users(), vec![UserId(8)]);

    driver.advance(Duration::from_millis(1_000));
    assert!(driver.session().typing_users().is_empty());
}

#[test]
fn remote_stop_and_message_clear_indicator() {
    let mut driver = live_driver();
    driver.remote_typing(UserId(7), true);
    driver.remote_typing(UserId(8), true);

    driver.remote_typing(UserId(7), false);
    assert_eq!(driver.session().typing_users(), vec![UserId(8)]);

    driver.remote_message(UserId(8), "done");
    assert!(driver.session().typing_users().is_empty());
}

#[test]
fn own_typing_echo_is_ignored() {
    let mut driver = live_driver();
    driver.remote_typing(UserId(1), true);
    assert!(driver.session().typing_users().is_empty());
}

#[test]
fn online_users_follow_presence_rows() {
    let mut driver = live_driver();
    driver.remote_presence(UserId(7));
    assert_eq!(driver.session().online_users(), vec![UserId(1), UserId(7)]);

    // Our own heartbeat keeps us fresh; user 7 ages out of the window.
    driver.advance(Duration::from_secs(181));
    assert_eq!(driver.session().online_users(), vec![UserId(1)]);
}

/// INVARIANT: Polling refreshes messages every 2s, presence every 10s and the
/// online list every 30s, all on one cadence.
#[test]
fn polling_cadence() {
    let mut driver = polling_driver();
    let fetches = driver.backend().fetch_count();
    let touches = driver.backend().touch_count();
    let reads = driver.backend().presence_read_count();

    driver.advance(Duration::from_secs(30));

    assert_eq!(driver.backend().fetch_count() - fetches, 15);
    assert_eq!(driver.backend().touch_count() - touches, 3);
    assert_eq!(driver.backend().presence_read_count() - reads, 1);
}

#[test]
fn polling_picks_up_remote_messages() {
    let mut driver = polling_driver();
    driver.remote_message(UserId(7), "hi");
    assert!(driver.session().messages().is_empty());

    driver.advance(Duration::from_secs(2));
    assert_eq!(driver.session().messages().len(), 1);
}

#[test]
fn polling_survives_read_failures() {
    let mut driver = polling_driver();
    driver.backend_mut().set_fail_fetches(true);
    driver.remote_message(UserId(7), "hi");
    driver.advance(Duration::from_secs(10));
    assert!(driver.session().messages().is_empty());

    driver.backend_mut().set_fail_fetches(false);
    driver.advance(Duration::from_secs(2));
    assert_eq!(driver.session().status(), POLLING);
    assert_eq!(driver.session().messages().len(), 1);
}
