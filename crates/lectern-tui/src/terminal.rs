//! Terminal front end.
//!
//! Reads keys with crossterm, forwards them to the chat runtime as commands,
//! and redraws with ratatui whenever the runtime publishes a new view.

use std::io::{self, Stdout, stdout};

use crossterm::{
    ExecutableCommand,
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use lectern_app::{ChatView, Command, RuntimeError, RuntimeHandle};
use lectern_core::UserId;
use ratatui::{Terminal, backend::CrosstermBackend};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use crate::{InputState, KeyInput, ui};

/// Terminal front end errors.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// I/O error from terminal operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The chat runtime is gone.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Terminal chat front end.
///
/// Owns the terminal for its lifetime: raw mode and the alternate screen are
/// entered on construction and left on drop.
pub struct ChatTerminal {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    event_stream: EventStream,
    input: InputState,
    handle: RuntimeHandle,
    view: watch::Receiver<ChatView>,
    me: UserId,
}

impl ChatTerminal {
    /// Take over the terminal for a runtime chatting as `me`.
    pub fn new(handle: RuntimeHandle, me: UserId) -> Result<Self, TerminalError> {
        enable_raw_mode()?;
        stdout().execute(EnterAlternateScreen)?;

        let terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
        let view = handle.subscribe();

        Ok(Self {
            terminal,
            event_stream: EventStream::new(),
            input: InputState::new(),
            handle,
            view,
            me,
        })
    }

    /// Run until the user quits or the runtime stops.
    pub async fn run(mut self) -> Result<(), TerminalError> {
        self.draw()?;

        loop {
            tokio::select! {
                maybe_event = self.event_stream.next() => {
                    match maybe_event {
                        Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                            if self.handle_key(key)? {
                                return Ok(());
                            }
                        },
                        Some(Ok(Event::Resize(..))) => self.draw()?,
                        Some(Ok(_)) => {},
                        Some(Err(e)) => return Err(TerminalError::Io(e)),
                        None => return Ok(()),
                    }
                },

                changed = self.view.changed() => {
                    if changed.is_err() {
                        debug!("runtime stopped, leaving terminal");
                        return Ok(());
                    }
                    let draft = self.view.borrow_and_update().draft.clone();
                    self.input.sync_draft(&draft);
                    self.draw()?;
                },
            }
        }
    }

    /// Returns `true` when the user asked to quit.
    fn handle_key(&mut self, key: KeyEvent) -> Result<bool, TerminalError> {
        let Some(input) = convert_key(key) else {
            return Ok(false);
        };

        let network_online = self.view.borrow().network_online;
        for command in self.input.handle_key(input, network_online) {
            let quit = command == Command::Shutdown;
            self.handle.send(command)?;
            if quit {
                return Ok(true);
            }
        }
        self.draw()?;
        Ok(false)
    }

    fn draw(&mut self) -> Result<(), TerminalError> {
        let view = self.view.borrow().clone();
        self.terminal.draw(|frame| {
            ui::render(frame, &view, &self.input, self.me);
        })?;
        Ok(())
    }
}

impl Drop for ChatTerminal {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = stdout().execute(LeaveAlternateScreen);
    }
}

/// Convert a crossterm key event to a [`KeyInput`].
fn convert_key(key: KeyEvent) -> Option<KeyInput> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char(c) => Some(KeyInput::Ctrl(c.to_ascii_lowercase())),
            _ => None,
        };
    }

    match key.code {
        KeyCode::Char(c) => Some(KeyInput::Char(c)),
        KeyCode::Enter => Some(KeyInput::Enter),
        KeyCode::Backspace => Some(KeyInput::Backspace),
        KeyCode::Delete => Some(KeyInput::Delete),
        KeyCode::Esc => Some(KeyInput::Esc),
        KeyCode::Left => Some(KeyInput::Left),
        KeyCode::Right => Some(KeyInput::Right),
        KeyCode::Home => Some(KeyInput::Home),
        KeyCode::End => Some(KeyInput::End),
        _ => None,
    }
}
