//! Input state and key handling for the TUI.
//!
//! This module owns the text input buffer and cursor and turns key events into
//! runtime [`Command`]s. Every edit reports the new text so the session can
//! drive typing indicators.

use lectern_app::Command;

/// Key input events from the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    /// Character input.
    Char(char),
    /// Control chord, lowercase.
    Ctrl(char),
    /// Enter/Return key.
    Enter,
    /// Backspace key.
    Backspace,
    /// Delete key.
    Delete,
    /// Escape key.
    Esc,
    /// Left arrow.
    Left,
    /// Right arrow.
    Right,
    /// Home key.
    Home,
    /// End key.
    End,
}

/// Input state for the TUI.
///
/// Manages the text input buffer and cursor position. The cursor counts
/// characters, not bytes.
#[derive(Debug, Default)]
pub struct InputState {
    buffer: String,
    cursor: usize,
    /// Last text the session was told about.
    reported: String,
}

impl InputState {
    /// Create a new empty input state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current text in the input buffer.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Cursor position in characters.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Handle a key input event.
    ///
    /// Returns the commands to send. [`Command::Shutdown`] means quit.
    pub fn handle_key(&mut self, key: KeyInput, network_online: bool) -> Vec<Command> {
        match key {
            KeyInput::Char(c) => {
                let at = self.byte_index();
                self.buffer.insert(at, c);
                self.cursor = self.cursor.saturating_add(1);
                self.edited()
            },
            KeyInput::Backspace => {
                if self.cursor == 0 {
                    return vec![];
                }
                self.cursor = self.cursor.saturating_sub(1);
                let at = self.byte_index();
                self.buffer.remove(at);
                self.edited()
            },
            KeyInput::Delete => {
                if self.cursor >= self.len() {
                    return vec![];
                }
                let at = self.byte_index();
                self.buffer.remove(at);
                self.edited()
            },
            KeyInput::Left => {
                self.cursor = self.cursor.saturating_sub(1);
                vec![]
            },
            KeyInput::Right => {
                self.cursor = self.cursor.saturating_add(1).min(self.len());
                vec![]
            },
            KeyInput::Home => {
                self.cursor = 0;
                vec![]
            },
            KeyInput::End => {
                self.cursor = self.len();
                vec![]
            },
            KeyInput::Enter => self.handle_enter(),
            KeyInput::Ctrl('r') => vec![Command::Reconnect],
            KeyInput::Ctrl('o') if network_online => vec![Command::NetworkOffline],
            KeyInput::Ctrl('o') => vec![Command::NetworkOnline],
            KeyInput::Ctrl('c') | KeyInput::Esc => vec![Command::Shutdown],
            KeyInput::Ctrl(_) => vec![],
        }
    }

    /// Adopt a draft the session changed on its own, such as text restored
    /// after a failed send.
    pub fn sync_draft(&mut self, draft: &str) {
        if draft == self.reported {
            return;
        }
        draft.clone_into(&mut self.buffer);
        draft.clone_into(&mut self.reported);
        self.cursor = self.len();
    }

    fn handle_enter(&mut self) -> Vec<Command> {
        if self.buffer.trim().is_empty() {
            return vec![];
        }
        let text = std::mem::take(&mut self.buffer);
        self.cursor = 0;
        self.reported.clear();
        vec![Command::Send(text)]
    }

    fn edited(&mut self) -> Vec<Command> {
        self.buffer.clone_into(&mut self.reported);
        vec![Command::Input(self.buffer.clone())]
    }

    fn len(&self) -> usize {
        self.buffer.chars().count()
    }

    fn byte_index(&self) -> usize {
        self.buffer.char_indices().nth(self.cursor).map_or(self.buffer.len(), |(i, _)| i)
    }
}
