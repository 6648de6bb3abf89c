//! Presence by periodically refreshed "last seen" timestamps.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::identity::UserId;

/// Row in the presence table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    /// User the row belongs to.
    pub user_id: UserId,
    /// Last liveness refresh (ms since the Unix epoch).
    pub last_seen_ms: u64,
}

/// Latest known `last_seen` per user.
#[derive(Debug, Clone)]
pub struct PresenceBook {
    last_seen: HashMap<UserId, u64>,
    window: Duration,
}

impl PresenceBook {
    /// Create an empty book with the given recency window.
    pub fn new(window: Duration) -> Self {
        Self { last_seen: HashMap::new(), window }
    }

    /// Lower bound of the recency window at `now_ms`.
    pub fn active_since(&self, now_ms: u64) -> u64 {
        let window_ms = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX);
        now_ms.saturating_sub(window_ms)
    }

    /// Replace the whole book with a fresh read.
    pub fn replace_all<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = PresenceEntry>,
    {
        self.last_seen = entries.into_iter().map(|e| (e.user_id, e.last_seen_ms)).collect();
    }

    /// Apply a single change. Older timestamps never overwrite newer ones.
    pub fn upsert(&mut self, entry: PresenceEntry) {
        let seen = self.last_seen.entry(entry.user_id).or_insert(entry.last_seen_ms);
        *seen = (*seen).max(entry.last_seen_ms);
    }

    /// Users seen within the window, sorted by ID.
    pub fn online(&self, now_ms: u64) -> Vec<UserId> {
        let since = self.active_since(now_ms);
        let mut users: Vec<UserId> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| **seen >= since)
            .map(|(user, _)| *user)
            .collect();
        users.sort_unstable();
        users
    }
}
