//! UI rendering
//!
//! Rendering functions that convert a [`ChatView`] into terminal output using
//! ratatui widgets. All functions are pure (no I/O), taking state and
//! returning widget trees.

mod chat;
mod input;
mod online;
mod status;

use lectern_app::ChatView;
use lectern_core::UserId;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
};

pub use chat::typing_line;

use crate::InputState;

/// Render the entire UI.
pub fn render(frame: &mut Frame, view: &ChatView, input: &InputState, me: UserId) {
    const MAIN_AREA_MIN_HEIGHT: u16 = 3;
    const TYPING_HEIGHT: u16 = 1;
    const INPUT_HEIGHT: u16 = 3;
    const STATUS_HEIGHT: u16 = 1;

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(MAIN_AREA_MIN_HEIGHT),
            Constraint::Length(TYPING_HEIGHT),
            Constraint::Length(INPUT_HEIGHT),
            Constraint::Length(STATUS_HEIGHT),
        ])
        .split(frame.area());

    let [main_area, typing_area, input_area, status_area] = chunks.as_ref() else {
        return;
    };

    render_main_area(frame, view, me, *main_area);
    chat::render_typing(frame, view, *typing_area);
    input::render(frame, input, *input_area);
    status::render(frame, view, *status_area);
}

/// Render the main area (chat + online sidebar).
fn render_main_area(frame: &mut Frame, view: &ChatView, me: UserId, area: Rect) {
    const CHAT_AREA_MIN_WIDTH: u16 = 20;
    const ONLINE_SIDEBAR_WIDTH: u16 = 18;

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(CHAT_AREA_MIN_WIDTH), Constraint::Length(ONLINE_SIDEBAR_WIDTH)])
        .split(area);

    let [chat_area, online_area] = chunks.as_ref() else {
        return;
    };

    chat::render(frame, view, me, *chat_area);
    online::render(frame, view, me, *online_area);
}

/// Name to show for a user: the author name on any of their messages, or
/// their ID.
pub fn display_name(view: &ChatView, user_id: UserId) -> String {
    view.messages
        .iter()
        .filter(|m| m.user_id == user_id)
        .find_map(|m| m.author.as_ref())
        .map_or_else(|| format!("user {}", user_id.0), |a| a.display_name.clone())
}
