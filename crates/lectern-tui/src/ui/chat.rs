//! Chat area
//!
//! Displays the message list and the typing line below it.

use lectern_app::ChatView;
use lectern_core::UserId;
use ratatui::{
    Frame,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
};

use super::display_name;

const BORDER_SIZE: u16 = 2;

/// Render the chat area.
pub fn render(frame: &mut Frame, view: &ChatView, me: UserId, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title(" Course chat ");

    let items: Vec<ListItem> = if view.messages.is_empty() {
        vec![ListItem::new(Line::from(Span::styled(
            "No messages yet",
            Style::default().fg(Color::DarkGray),
        )))]
    } else {
        view.messages
            .iter()
            .map(|msg| {
                let name = msg
                    .author
                    .as_ref()
                    .map_or_else(|| format!("user {}", msg.user_id.0), |a| a.display_name.clone());
                let name_color = if msg.user_id == me { Color::Cyan } else { Color::Green };

                let mut spans = vec![
                    Span::styled(name, Style::default().fg(name_color).add_modifier(Modifier::BOLD)),
                    Span::raw(": "),
                ];
                if msg.is_pending() {
                    spans.push(Span::styled(
                        format!("{} (sending)", msg.content),
                        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                    ));
                } else {
                    spans.push(Span::raw(msg.content.clone()));
                }
                ListItem::new(Line::from(spans))
            })
            .collect()
    };

    let visible_height = area.height.saturating_sub(BORDER_SIZE) as usize;
    let skip = items.len().saturating_sub(visible_height);
    let visible_items: Vec<_> = items.into_iter().skip(skip).collect();

    frame.render_widget(List::new(visible_items).block(block), area);
}

/// Render the typing line.
pub fn render_typing(frame: &mut Frame, view: &ChatView, area: Rect) {
    let line = typing_line(view).unwrap_or_default();
    let paragraph = Paragraph::new(format!(" {line}"))
        .style(Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC));
    frame.render_widget(paragraph, area);
}

/// Sentence describing who is typing, if anyone.
pub fn typing_line(view: &ChatView) -> Option<String> {
    let names: Vec<String> = view.typing.iter().map(|u| display_name(view, *u)).collect();
    match names.as_slice() {
        [] => None,
        [one] => Some(format!("{one} is typing…")),
        [first, second] => Some(format!("{first} and {second} are typing…")),
        many => Some(format!("{} people are typing…", many.len())),
    }
}
