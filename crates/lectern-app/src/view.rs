//! View model published by the runtime.

use lectern_core::{
    BadgeKind, ChatSession, ConnectionStatus, Environment, Message, Notification, UserId,
};

/// Everything a frontend needs to draw the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatView {
    /// Connection status.
    pub status: ConnectionStatus,
    /// Badge kind, for styling.
    pub badge: BadgeKind,
    /// Badge text including the attempt annotation.
    pub badge_label: String,
    /// Messages in display order, pending sends last.
    pub messages: Vec<Message>,
    /// Users seen within the presence window.
    pub online: Vec<UserId>,
    /// Remote users currently typing.
    pub typing: Vec<UserId>,
    /// Input text, including text restored after a failed send.
    pub draft: String,
    /// Last user-visible notification.
    pub notice: Option<String>,
    /// Host network signal.
    pub network_online: bool,
}

impl Default for ChatView {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            badge: BadgeKind::Disconnected,
            badge_label: "Disconnected".into(),
            messages: Vec::new(),
            online: Vec::new(),
            typing: Vec::new(),
            draft: String::new(),
            notice: None,
            network_online: true,
        }
    }
}

impl ChatView {
    /// Capture the session's current state.
    pub fn capture<E: Environment>(session: &ChatSession<E>) -> Self {
        let badge = session.badge();
        Self {
            status: session.status(),
            badge: badge.kind,
            badge_label: badge.label(),
            messages: session.messages().to_vec(),
            online: session.online_users(),
            typing: session.typing_users(),
            draft: session.draft().to_owned(),
            notice: session.notice().map(describe),
            network_online: session.network_online(),
        }
    }

    /// Messages that are confirmed by the backend.
    pub fn stored_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| !m.is_pending())
    }
}

fn describe(notification: &Notification) -> String {
    match notification {
        Notification::SendFailed { content } => format!("Message not delivered: {content}"),
    }
}
