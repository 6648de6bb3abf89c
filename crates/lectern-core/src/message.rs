//! Chat messages and the local message log.
//!
//! The backend owns the canonical copy of every message. The session keeps a
//! merged view: rows arrive from the initial fetch, from polling and from the
//! realtime channel (in any order, possibly more than once), and locally sent
//! messages appear immediately as pending entries until the insert is
//! confirmed.
//!
//! # Invariants
//!
//! - A stored ID appears at most once.
//! - Stored entries are ordered by `(created_at_ms, id)`.
//! - Pending entries sit after all stored entries, in send order.

use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};

use crate::identity::{Author, UserId};

/// Client-side identity of an outgoing message, stable across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SendId(pub u64);

impl fmt::Display for SendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send#{}", self.0)
    }
}

/// Message identity in the local log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Confirmed by the backend.
    Stored(u64),
    /// Optimistic entry awaiting confirmation.
    Pending(SendId),
}

/// Message row as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Backend row ID.
    pub id: u64,
    /// Message text.
    pub content: String,
    /// Server timestamp (ms since the Unix epoch).
    pub created_at_ms: u64,
    /// Author's user ID.
    pub user_id: UserId,
    /// Joined author profile, when the backend provides it.
    pub author: Option<Author>,
}

/// Record inserted into the messages table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Author's user ID.
    pub user_id: UserId,
    /// Message text.
    pub content: String,
}

/// Message as displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Stored or pending identity.
    pub id: MessageId,
    /// Message text.
    pub content: String,
    /// Server timestamp, or the local send time while pending.
    pub created_at_ms: u64,
    /// Author's user ID.
    pub user_id: UserId,
    /// Author display info, if known.
    pub author: Option<Author>,
}

impl Message {
    /// True while awaiting backend confirmation.
    pub fn is_pending(&self) -> bool {
        matches!(self.id, MessageId::Pending(_))
    }
}

impl From<StoredMessage> for Message {
    fn from(row: StoredMessage) -> Self {
        Self {
            id: MessageId::Stored(row.id),
            content: row.content,
            created_at_ms: row.created_at_ms,
            user_id: row.user_id,
            author: row.author,
        }
    }
}

/// Merged, de-duplicated message list.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
    stored_ids: HashSet<u64>,
}

impl MessageLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge backend rows. Returns how many were new.
    pub fn merge<I>(&mut self, rows: I) -> usize
    where
        I: IntoIterator<Item = StoredMessage>,
    {
        rows.into_iter().map(|row| self.insert_stored(row)).filter(|added| *added).count()
    }

    /// Insert one backend row. Returns false if it was already present.
    pub fn insert_stored(&mut self, row: StoredMessage) -> bool {
        if !self.stored_ids.insert(row.id) {
            return false;
        }

        let key = (row.created_at_ms, row.id);
        let stored_len = self.stored_len();
        let position = self.messages[..stored_len].partition_point(|m| sort_key(m) <= key);
        self.messages.insert(position, Message::from(row));
        true
    }

    /// Append an optimistic entry for an outgoing message.
    pub fn push_pending(&mut self, message: Message) {
        debug_assert!(message.is_pending());
        self.messages.push(message);
    }

    /// Replace a pending entry with its stored row.
    ///
    /// If the row already arrived through another path (realtime echo,
    /// polling), the pending entry is dropped instead so exactly one copy
    /// remains. Returns false if no pending entry existed.
    pub fn reconcile(&mut self, send_id: SendId, row: StoredMessage) -> bool {
        let removed = self.remove_pending(send_id).is_some();
        self.insert_stored(row);
        removed
    }

    /// Remove a pending entry.
    pub fn remove_pending(&mut self, send_id: SendId) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.id == MessageId::Pending(send_id))?;
        Some(self.messages.remove(index))
    }

    /// Drop every pending entry.
    pub fn clear_pending(&mut self) {
        self.messages.retain(|m| !m.is_pending());
    }

    /// Server timestamp of the newest stored message. `None` if empty.
    pub fn latest_stored_at(&self) -> Option<u64> {
        self.messages[..self.stored_len()].last().map(|m| m.created_at_ms)
    }

    /// True if a pending entry exists for `send_id`.
    pub fn has_pending(&self, send_id: SendId) -> bool {
        self.messages.iter().any(|m| m.id == MessageId::Pending(send_id))
    }

    /// True if a stored row with this ID is present.
    pub fn contains_stored(&self, id: u64) -> bool {
        self.stored_ids.contains(&id)
    }

    /// Messages in display order.
    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages (stored and pending).
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn stored_len(&self) -> usize {
        self.messages.iter().take_while(|m| !m.is_pending()).count()
    }
}

fn sort_key(message: &Message) -> (u64, u64) {
    match message.id {
        MessageId::Stored(id) => (message.created_at_ms, id),
        MessageId::Pending(_) => (u64::MAX, u64::MAX),
    }
}
