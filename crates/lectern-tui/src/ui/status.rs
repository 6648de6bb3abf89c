//! Status bar
//!
//! Displays the connection badge, the network signal, the last notice and the
//! key bindings.

use lectern_app::ChatView;
use lectern_core::BadgeKind;
use ratatui::{
    Frame,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
};

const KEY_HINTS: &str = " | Enter send · ^R reconnect · ^O network · Esc quit";

/// Render the status bar.
pub fn render(frame: &mut Frame, view: &ChatView, area: Rect) {
    let badge_color = match view.badge {
        BadgeKind::Live => Color::Green,
        BadgeKind::Polling | BadgeKind::Connecting => Color::Yellow,
        BadgeKind::Disconnected => Color::Red,
    };

    let mut spans = vec![
        Span::raw(" "),
        Span::styled(
            view.badge_label.clone(),
            Style::default().fg(badge_color).add_modifier(Modifier::BOLD),
        ),
    ];
    if !view.network_online {
        spans.push(Span::styled(" | offline", Style::default().fg(Color::Red)));
    }
    match &view.notice {
        Some(notice) => spans.push(Span::styled(
            format!(" | {notice}"),
            Style::default().fg(Color::LightRed).add_modifier(Modifier::BOLD),
        )),
        None => spans.push(Span::styled(KEY_HINTS, Style::default().fg(Color::Gray))),
    }

    let paragraph =
        Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::DarkGray).fg(Color::White));

    frame.render_widget(paragraph, area);
}
