use karaoke_core::RenderState;
use ratatui::{
    style::{Color, Modifier, Style},
    widgets::{Block, BorderType, Borders, Padding},
};

// ── Color palette ──────────────────────────────────────────────────────

pub const ACCENT: Color = Color::Rgb(130, 170, 255);
pub const SUCCESS: Color = Color::Rgb(120, 220, 120);
pub const ERROR: Color = Color::Rgb(240, 100, 100);
pub const WARNING: Color = Color::Rgb(240, 200, 80);

pub const TEXT_PRIMARY: Color = Color::Rgb(220, 220, 230);
pub const TEXT_SECONDARY: Color = Color::Rgb(140, 140, 160);
pub const TEXT_MUTED: Color = Color::Rgb(90, 90, 110);

pub const BORDER: Color = Color::Rgb(60, 60, 80);
pub const BORDER_FOCUS: Color = Color::Rgb(130, 170, 255); // same as ACCENT
pub const SURFACE_HIGHLIGHT: Color = Color::Rgb(45, 45, 60);

pub const LOG_GUTTER: Color = Color::Rgb(180, 140, 255);

// ── Helpers ────────────────────────────────────────────────────────────

/// Build a themed block with rounded borders, optional title, and focus coloring.
pub fn styled_block(title: &str, focused: bool) -> Block<'_> {
    let border_color = if focused { BORDER_FOCUS } else { BORDER };
    let mut block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(border_color))
        .padding(Padding::new(1, 1, 0, 0));
    if !title.is_empty() {
        block = block.title(format!(" {title} "))
            .title_style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD));
    }
    block
}

/// Symbol and color for a stage in the graph.
pub fn render_state_symbol(state: RenderState) -> (&'static str, Color) {
    match state {
        RenderState::Success => ("\u{2713}", SUCCESS),
        RenderState::Failure => ("\u{2717}", ERROR),
        RenderState::Running => ("\u{25b6}", ACCENT),
        RenderState::Queued => ("\u{25cb}", TEXT_MUTED),
        RenderState::NotBuilt => ("\u{2298}", TEXT_MUTED),
        RenderState::Unknown => ("?", WARNING),
    }
}

/// Color for a lower-cased run or step status such as `"success"` or `"running"`.
pub fn status_color(status: &str) -> Color {
    match status {
        "success" => SUCCESS,
        "failure" => ERROR,
        "unstable" | "aborted" => WARNING,
        "running" | "queued" => ACCENT,
        _ => TEXT_SECONDARY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_state_symbols_are_distinct() {
        let states = [
            RenderState::Success,
            RenderState::Failure,
            RenderState::Running,
            RenderState::Queued,
            RenderState::NotBuilt,
            RenderState::Unknown,
        ];
        let mut symbols: Vec<&str> = states.iter().map(|s| render_state_symbol(*s).0).collect();
        symbols.sort();
        symbols.dedup();
        assert_eq!(symbols.len(), states.len());
    }

    #[test]
    fn test_status_color() {
        assert_eq!(status_color("success"), SUCCESS);
        assert_eq!(status_color("failure"), ERROR);
        assert_eq!(status_color("aborted"), WARNING);
        assert_eq!(status_color("running"), ACCENT);
        assert_eq!(status_color("not_built"), TEXT_SECONDARY);
    }
}
