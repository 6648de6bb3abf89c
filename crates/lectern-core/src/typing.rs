//! Typing indicators.
//!
//! Purely a rendering hint: nothing is persisted and the remote set is rebuilt
//! entirely from broadcasts.

use std::{collections::HashMap, ops::Sub, time::Duration};

use crate::identity::UserId;

/// Remote users currently typing, each with the instant of their last signal.
#[derive(Debug, Clone)]
pub struct TypingIndicators<I> {
    users: HashMap<UserId, I>,
    expiry: Duration,
}

impl<I> TypingIndicators<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create an empty set whose entries expire after `expiry` of silence.
    pub fn new(expiry: Duration) -> Self {
        Self { users: HashMap::new(), expiry }
    }

    /// Record a `typing_start`. Returns true if the user was not listed.
    pub fn start(&mut self, user_id: UserId, now: I) -> bool {
        self.users.insert(user_id, now).is_none()
    }

    /// Record a `typing_stop` (or any other proof the burst ended).
    pub fn stop(&mut self, user_id: UserId) -> bool {
        self.users.remove(&user_id).is_some()
    }

    /// Drop entries silent for at least the expiry. Returns true if any were
    /// dropped.
    pub fn expire(&mut self, now: I) -> bool {
        let before = self.users.len();
        let expiry = self.expiry;
        self.users.retain(|_, since| now - *since < expiry);
        self.users.len() != before
    }

    /// Time until the next entry expires. `None` if the set is empty.
    pub fn next_expiry(&self, now: I) -> Option<Duration> {
        self.users.values().map(|since| self.expiry.saturating_sub(now - *since)).min()
    }

    /// Typing users, sorted by ID.
    pub fn users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.users.keys().copied().collect();
        users.sort_unstable();
        users
    }

    /// Forget everyone.
    pub fn clear(&mut self) {
        self.users.clear();
    }

    /// True if nobody is typing.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Local typing burst.
///
/// One `typing_start` per continuous burst; the burst ends on idle timeout or
/// when the message is sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypingBurst {
    active: bool,
}

impl TypingBurst {
    /// Mark a keystroke. Returns true if this starts a new burst.
    pub fn begin(&mut self) -> bool {
        !std::mem::replace(&mut self.active, true)
    }

    /// End the burst. Returns true if one was active.
    pub fn end(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }

    /// True while a burst is active.
    pub fn is_active(self) -> bool {
        self.active
    }
}
