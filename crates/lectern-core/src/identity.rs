//! User identity types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Display information attached to a message author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Name shown next to the message.
    pub display_name: String,
    /// Profile picture, if the user uploaded one.
    pub avatar_url: Option<String>,
}

/// The logged-in user a session chats as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Backend user ID.
    pub user_id: UserId,
    /// Name shown on optimistic messages until the server copy arrives.
    pub display_name: String,
}

impl Identity {
    /// Create an identity.
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self { user_id, display_name: display_name.into() }
    }

    /// Author info for locally originated messages.
    pub fn author(&self) -> Author {
        Author { display_name: self.display_name.clone(), avatar_url: None }
    }
}
