//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::BTreeSet;

use lectern_core::{ConnectionStatus, DeliveryMode, MessageId, SendId, Timer};

use super::{Invariant, InvariantResult, SessionSnapshot};

/// The attempt counter is zero whenever connected.
///
/// Any successful connection, including polling as last resort, starts a
/// fresh attempt sequence. A non-zero counter while connected would make the
/// next failure back off longer than it should and mislabel the badge.
pub struct ConnectedHasNoAttempts;

impl Invariant for ConnectedHasNoAttempts {
    fn name(&self) -> &'static str {
        "ConnectedHasNoAttempts"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        if state.status.is_connected() && state.reconnect_attempts != 0 {
            return Err(self.violation(format!(
                "{} with {} reconnect attempts",
                state.status, state.reconnect_attempts
            )));
        }
        Ok(())
    }
}

/// Poll timers are armed exactly while connected in polling mode.
///
/// Each poller is a single key, so duplicate overlapping pollers cannot exist;
/// this catches pollers that outlive polling or never started.
pub struct PollersMatchMode;

impl Invariant for PollersMatchMode {
    fn name(&self) -> &'static str {
        "PollersMatchMode"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let polling = state.status.mode() == Some(DeliveryMode::Polling);
        for poller in Timer::POLLERS {
            let armed = state.armed_timers.contains(&poller);
            if armed != polling {
                return Err(self.violation(format!(
                    "{poller} armed={armed} while {}",
                    state.status
                )));
            }
        }
        Ok(())
    }
}

/// The heartbeat runs exactly while connected in realtime mode.
pub struct HeartbeatMatchesMode;

impl Invariant for HeartbeatMatchesMode {
    fn name(&self) -> &'static str {
        "HeartbeatMatchesMode"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let realtime = state.status.mode() == Some(DeliveryMode::Realtime);
        let armed = state.armed_timers.contains(&Timer::Heartbeat);
        if armed != realtime {
            return Err(self.violation(format!("heartbeat armed={armed} while {}", state.status)));
        }
        Ok(())
    }
}

/// A current channel exists exactly while connecting or live, and only a
/// connecting session waits on a subscribe deadline for it.
pub struct ChannelMatchesStatus;

impl Invariant for ChannelMatchesStatus {
    fn name(&self) -> &'static str {
        "ChannelMatchesStatus"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let needs_channel = matches!(
            state.status,
            ConnectionStatus::Connecting
                | ConnectionStatus::Connected { mode: DeliveryMode::Realtime }
        );
        if state.current_channel.is_some() != needs_channel {
            return Err(self.violation(format!(
                "current channel {:?} while {}",
                state.current_channel, state.status
            )));
        }

        let deadlines: Vec<_> = state
            .armed_timers
            .iter()
            .filter_map(|t| match t {
                Timer::SubscribeTimeout(channel) => Some(*channel),
                _ => None,
            })
            .collect();
        let expected: Vec<_> = match (state.status, state.current_channel) {
            (ConnectionStatus::Connecting, Some(channel)) => vec![channel],
            _ => Vec::new(),
        };
        if deadlines != expected {
            return Err(self.violation(format!(
                "subscribe deadlines {deadlines:?} while {} on {:?}",
                state.status, state.current_channel
            )));
        }
        Ok(())
    }
}

/// A backoff timer is armed exactly while reconnecting.
pub struct ReconnectTimerMatchesStatus;

impl Invariant for ReconnectTimerMatchesStatus {
    fn name(&self) -> &'static str {
        "ReconnectTimerMatchesStatus"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let reconnecting = state.status == ConnectionStatus::Reconnecting;
        let armed = state.armed_timers.contains(&Timer::Reconnect);
        if armed != reconnecting {
            return Err(self.violation(format!("reconnect armed={armed} while {}", state.status)));
        }
        Ok(())
    }
}

/// Each stored ID appears once and pending entries sit after stored ones.
pub struct UniqueMessages;

impl Invariant for UniqueMessages {
    fn name(&self) -> &'static str {
        "UniqueMessages"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let mut seen = BTreeSet::new();
        let mut pending_seen = false;
        for id in &state.message_ids {
            match id {
                MessageId::Stored(row) => {
                    if pending_seen {
                        return Err(self.violation(format!("stored {row} after a pending entry")));
                    }
                    if !seen.insert(*row) {
                        return Err(self.violation(format!("stored {row} appears twice")));
                    }
                },
                MessageId::Pending(_) => pending_seen = true,
            }
        }
        Ok(())
    }
}

/// Pending entries mirror in-flight sends, and every unconfirmed send has
/// exactly the timer that will move it forward.
pub struct PendingMatchesOutbox;

impl Invariant for PendingMatchesOutbox {
    fn name(&self) -> &'static str {
        "PendingMatchesOutbox"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let pending: BTreeSet<SendId> = state
            .message_ids
            .iter()
            .filter_map(|id| match id {
                MessageId::Pending(send_id) => Some(*send_id),
                MessageId::Stored(_) => None,
            })
            .collect();
        let in_flight: BTreeSet<SendId> = state.in_flight_sends.iter().copied().collect();
        if pending != in_flight {
            return Err(self.violation(format!(
                "pending entries {pending:?} but in-flight sends {in_flight:?}"
            )));
        }

        for send_id in &state.in_flight_sends {
            if !state.armed_timers.contains(&Timer::SendTimeout(*send_id)) {
                return Err(self.violation(format!("{send_id} in flight without a timeout")));
            }
        }
        for send_id in &state.retrying_sends {
            if !state.armed_timers.contains(&Timer::SendRetry(*send_id)) {
                return Err(self.violation(format!("{send_id} waiting without a retry timer")));
            }
        }
        Ok(())
    }
}
