//! Online users sidebar

use lectern_app::ChatView;
use lectern_core::UserId;
use ratatui::{
    Frame,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem},
};

use super::display_name;

const ONLINE_MARKER: &str = "● ";

/// Render the online users sidebar.
pub fn render(frame: &mut Frame, view: &ChatView, me: UserId, area: Rect) {
    let items: Vec<ListItem> = view
        .online
        .iter()
        .map(|&user_id| {
            let (name, style) = if user_id == me {
                ("you".to_owned(), Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
            } else {
                (display_name(view, user_id), Style::default())
            };
            ListItem::new(Line::from(vec![
                Span::styled(ONLINE_MARKER, Style::default().fg(Color::Green)),
                Span::styled(name, style),
            ]))
        })
        .collect();

    let title = format!(" Online ({}) ", view.online.len());
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));

    frame.render_widget(list, area);
}
