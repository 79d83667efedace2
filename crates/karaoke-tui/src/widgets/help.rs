use ratatui::{
    layout::{Constraint, Flex, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

/// Render a centered help overlay popup.
pub fn render_help_overlay(frame: &mut Frame, area: Rect, has_stages: bool) {
    // Center a box
    let popup_area = centered_rect(50, 60, area);

    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Help ")
        .style(Style::default().fg(Color::White));

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let mut lines = vec![
        Line::from(Span::styled(
            "  Keyboard Shortcuts",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];

    if has_stages {
        lines.extend([
            help_line("Tab", "Switch between stages and log"),
            help_line("j / k", "Move through stages (stage pane)"),
            help_line("Enter", "Open stage, follow again if running"),
        ]);
    }
    lines.extend([
        help_line("k / ↑", "Scroll up and stop following"),
        help_line("j / ↓", "Scroll down"),
        help_line("PgUp / PgDn", "Scroll log by a page"),
        help_line("Home", "Scroll to top"),
        help_line("End", "Jump back to the bottom"),
        help_line("J / K", "Next / previous step"),
        help_line("Enter", "Show the selected step's log"),
        help_line("r", "Refresh now"),
        help_line("q / Esc", "Quit"),
        help_line("?", "Toggle this help"),
    ]);

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "  Press any key to close",
        Style::default().fg(Color::DarkGray),
    )));

    let paragraph = Paragraph::new(lines);
    frame.render_widget(paragraph, inner);
}

fn help_line<'a>(key: &'a str, desc: &'a str) -> Line<'a> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(
            format!("{key:>12}"),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::raw(desc),
    ])
}

/// Calculate a centered rect within `area`.
fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::vertical([Constraint::Percentage(percent_y)])
        .flex(Flex::Center)
        .split(area);
    Layout::horizontal([Constraint::Percentage(percent_x)])
        .flex(Flex::Center)
        .split(vertical[0])[0]
}
