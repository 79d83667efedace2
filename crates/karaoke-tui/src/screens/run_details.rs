use crate::theme;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use karaoke_core::util::{format_duration_millis, truncate_chars};
use karaoke_core::{
    BuildState, FollowKey, KaraokeEvent, RenderNode, RenderState, RunDetailsView, Step, UserInput,
};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, LineGauge, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap},
    Frame,
};

/// Which panel receives navigation keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    Stages,
    Log,
}

/// Actions the run details screen can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunDetailsAction {
    None,
    Quit,
    ToggleHelp,
    /// Forward to the mounted view.
    Input(UserInput),
}

/// One row of the stage list: a top-level stage or a parallel branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRow {
    pub id: String,
    pub name: String,
    pub state: RenderState,
    pub complete_percent: u8,
    pub depth: u8,
}

/// Flatten the stage tree into display rows, branches under their parent.
pub fn stage_rows(graph: &[RenderNode]) -> Vec<StageRow> {
    let mut rows = Vec::new();
    for node in graph {
        rows.push(StageRow {
            id: node.id.clone(),
            name: node.name.clone(),
            state: node.state,
            complete_percent: node.complete_percent,
            depth: 0,
        });
        for child in &node.children {
            rows.push(StageRow {
                id: child.id.clone(),
                name: child.name.clone(),
                state: child.state,
                complete_percent: child.complete_percent,
                depth: 1,
            });
        }
    }
    rows
}

const SPINNER_FRAMES: &[&str] = &["\u{280b}", "\u{2819}", "\u{2839}", "\u{2838}", "\u{283c}", "\u{2834}", "\u{2826}", "\u{2827}", "\u{2807}", "\u{280f}"];

/// Lines scrolled per page key or wheel notch.
const PAGE: u16 = 10;
const WHEEL: u16 = 3;

/// State for the run details screen.
pub struct RunDetailsState {
    /// Latest view published by the orchestrator.
    pub view: RunDetailsView,
    pub focus: Pane,
    /// Cursor in the stage list.
    pub stage_cursor: usize,
    /// Cursor in the step list.
    pub step_cursor: usize,
    /// Manual scroll offset for the log panel.
    pub log_scroll: u16,
    /// Whether the user has scrolled away from the bottom.
    pub log_scroll_pinned: bool,
    /// Total rendered line count of the log panel (for scroll bounds).
    log_content_height: usize,
    /// Last warning or failure, with whether it is an error.
    pub notice: Option<(String, bool)>,
    pub spinner_frame: usize,
    /// Log lines received since mount.
    pub lines_received: usize,
    /// The user moved the stage cursor, so stop tracking the selected stage.
    stage_cursor_moved: bool,
}

impl RunDetailsState {
    pub fn new(view: RunDetailsView) -> Self {
        let mut state = Self {
            view: RunDetailsView::default(),
            focus: Pane::Log,
            stage_cursor: 0,
            step_cursor: 0,
            log_scroll: 0,
            log_scroll_pinned: false,
            log_content_height: 0,
            notice: None,
            spinner_frame: 0,
            lines_received: 0,
            stage_cursor_moved: false,
        };
        state.set_view(view);
        state
    }

    /// Replace the rendered view, keeping cursors in bounds.
    pub fn set_view(&mut self, view: RunDetailsView) {
        self.view = view;
        let rows = stage_rows(&self.view.graph);

        if !self.stage_cursor_moved || self.view.follow_along {
            if let Some(index) = self
                .view
                .selected
                .id
                .as_deref()
                .and_then(|id| rows.iter().position(|r| r.id == id))
            {
                self.stage_cursor = index;
            }
        }
        self.stage_cursor = self.stage_cursor.min(rows.len().saturating_sub(1));

        let steps = self.view.steps.as_ref().map_or(0, Vec::len);
        self.step_cursor = self.step_cursor.min(steps.saturating_sub(1));
    }

    pub fn on_tick(&mut self) {
        self.spinner_frame = (self.spinner_frame + 1) % SPINNER_FRAMES.len();
    }

    pub fn handle_karaoke_event(&mut self, event: KaraokeEvent) {
        match event {
            KaraokeEvent::LogUpdated { lines, .. } => {
                self.lines_received += lines.len();
            }
            KaraokeEvent::FollowChanged { follow_along } => {
                if follow_along {
                    self.log_scroll_pinned = false;
                    self.stage_cursor_moved = false;
                }
            }
            KaraokeEvent::FetchFailed {
                resource, error, ..
            } => {
                self.notice = Some((
                    format!("Failed to fetch {resource}: {}", truncate_chars(&error, 80)),
                    true,
                ));
            }
            KaraokeEvent::StreamDegraded { reason } => {
                self.notice = Some((
                    format!("Live events unavailable ({}), polling only", truncate_chars(&reason, 60)),
                    false,
                ));
            }
            KaraokeEvent::RunUpdated { state, result } => {
                if state == Some(BuildState::Finished) {
                    let status = result.map(|r| r.as_str()).unwrap_or("unknown");
                    self.notice = Some((format!("Run finished: {status}"), status == "failure"));
                }
            }
            KaraokeEvent::NodesUpdated { .. } => {
                // a successful graph fetch supersedes an earlier failure
                if matches!(self.notice, Some((_, true))) {
                    self.notice = None;
                }
            }
            KaraokeEvent::Mounted { .. }
            | KaraokeEvent::StepsUpdated { .. }
            | KaraokeEvent::StepCollapsed { .. }
            | KaraokeEvent::Unmounted { .. } => {}
        }
    }

    fn stage_count(&self) -> usize {
        stage_rows(&self.view.graph).len()
    }

    fn steps(&self) -> &[Step] {
        self.view.steps.as_deref().unwrap_or_default()
    }

    fn scroll_up(&mut self, delta: u16) -> RunDetailsAction {
        self.log_scroll = self.log_scroll.saturating_sub(delta);
        self.log_scroll_pinned = true;
        RunDetailsAction::Input(UserInput::Scroll {
            delta_y: -i32::from(delta),
        })
    }

    /// Scroll the log panel down by `delta` lines, clamped to content bounds.
    fn scroll_down(&mut self, delta: u16) -> RunDetailsAction {
        let max = self.log_content_height.saturating_sub(1) as u16;
        self.log_scroll = self.log_scroll.saturating_add(delta).min(max);
        RunDetailsAction::Input(UserInput::Scroll {
            delta_y: i32::from(delta),
        })
    }

    /// Handle a key event. Returns the resulting action.
    pub fn handle_key(&mut self, key: KeyEvent) -> RunDetailsAction {
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                RunDetailsAction::Quit
            }
            KeyCode::Char('q') | KeyCode::Esc => RunDetailsAction::Quit,
            KeyCode::Char('?') => RunDetailsAction::ToggleHelp,
            KeyCode::Tab => {
                self.focus = match self.focus {
                    Pane::Stages => Pane::Log,
                    Pane::Log => Pane::Stages,
                };
                RunDetailsAction::None
            }
            KeyCode::Char('r') => RunDetailsAction::Input(UserInput::Refresh),

            // Stage list
            KeyCode::Up | KeyCode::Char('k') if self.focus == Pane::Stages => {
                self.stage_cursor = self.stage_cursor.saturating_sub(1);
                self.stage_cursor_moved = true;
                RunDetailsAction::None
            }
            KeyCode::Down | KeyCode::Char('j') if self.focus == Pane::Stages => {
                let last = self.stage_count().saturating_sub(1);
                self.stage_cursor = (self.stage_cursor + 1).min(last);
                self.stage_cursor_moved = true;
                RunDetailsAction::None
            }
            KeyCode::Enter if self.focus == Pane::Stages => {
                match stage_rows(&self.view.graph).get(self.stage_cursor) {
                    Some(row) => {
                        self.log_scroll = 0;
                        self.step_cursor = 0;
                        RunDetailsAction::Input(UserInput::NodeClicked(row.id.clone()))
                    }
                    None => RunDetailsAction::None,
                }
            }

            // Log panel
            KeyCode::Up | KeyCode::Char('k') => {
                self.log_scroll = self.log_scroll.saturating_sub(1);
                self.log_scroll_pinned = true;
                RunDetailsAction::Input(UserInput::Key(FollowKey::Up))
            }
            KeyCode::Down | KeyCode::Char('j') => self.scroll_down(1),
            KeyCode::PageUp => self.scroll_up(PAGE),
            KeyCode::PageDown => self.scroll_down(PAGE),
            KeyCode::Home => {
                self.log_scroll = 0;
                self.log_scroll_pinned = true;
                RunDetailsAction::Input(UserInput::Key(FollowKey::Up))
            }
            KeyCode::End => {
                self.log_scroll_pinned = false;
                RunDetailsAction::None
            }
            KeyCode::Char('K') => {
                self.step_cursor = self.step_cursor.saturating_sub(1);
                RunDetailsAction::None
            }
            KeyCode::Char('J') => {
                let last = self.steps().len().saturating_sub(1);
                self.step_cursor = (self.step_cursor + 1).min(last);
                RunDetailsAction::None
            }
            KeyCode::Enter => match self.steps().get(self.step_cursor) {
                Some(step) => RunDetailsAction::Input(UserInput::ExpandStep(step.id.clone())),
                None => RunDetailsAction::None,
            },
            _ => RunDetailsAction::None,
        }
    }

    /// Mouse wheel scrolls the log panel.
    pub fn handle_mouse(&mut self, mouse: MouseEvent) -> RunDetailsAction {
        match mouse.kind {
            MouseEventKind::ScrollUp => self.scroll_up(WHEEL),
            MouseEventKind::ScrollDown => self.scroll_down(WHEEL),
            _ => RunDetailsAction::None,
        }
    }

    /// Render the run details screen.
    pub fn render(&mut self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2), // header
                Constraint::Length(1), // progress bar
                Constraint::Min(0),    // main content
                Constraint::Length(2), // footer
            ])
            .split(area);

        self.render_header(frame, chunks[0]);
        self.render_progress_bar(frame, chunks[1]);
        self.render_body(frame, chunks[2]);
        self.render_footer(frame, chunks[3]);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let status = if self.view.run_status.is_empty() {
            "unknown"
        } else {
            self.view.run_status.as_str()
        };
        let (mode, mode_color) = if self.view.follow_along {
            ("following", theme::SUCCESS)
        } else {
            ("pinned", theme::TEXT_SECONDARY)
        };

        let mut spans = vec![
            Span::styled(
                "  karaoke",
                Style::default()
                    .fg(theme::ACCENT)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(" \u{2502} ", Style::default().fg(theme::BORDER)),
            Span::styled(
                status,
                Style::default()
                    .fg(theme::status_color(status))
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(": ", Style::default().fg(theme::TEXT_SECONDARY)),
            Span::styled(
                &self.view.pipeline_name,
                Style::default()
                    .fg(theme::TEXT_PRIMARY)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(" #{}", self.view.run_id),
                Style::default().fg(theme::TEXT_MUTED),
            ),
            Span::styled(" \u{2502} ", Style::default().fg(theme::BORDER)),
            Span::styled(mode, Style::default().fg(mode_color)),
        ];
        if self.view.stream_degraded {
            spans.push(Span::styled(
                "  polling",
                Style::default().fg(theme::WARNING),
            ));
        }

        let sub = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Length(1)])
            .split(area);
        frame.render_widget(Paragraph::new(Line::from(spans)), sub[0]);
        let sep = Block::default()
            .borders(Borders::BOTTOM)
            .border_style(Style::default().fg(theme::BORDER));
        frame.render_widget(sep, sub[1]);
    }

    fn render_progress_bar(&self, frame: &mut Frame, area: Rect) {
        let rows = stage_rows(&self.view.graph);
        let top_level: Vec<&StageRow> = rows.iter().filter(|r| r.depth == 0).collect();
        let done = top_level
            .iter()
            .filter(|r| matches!(r.state, RenderState::Success | RenderState::Failure | RenderState::NotBuilt))
            .count();
        let total = top_level.len().max(1);
        let ratio = (done as f64 / total as f64).min(1.0);

        let color = if top_level.iter().any(|r| r.state == RenderState::Failure) {
            theme::ERROR
        } else if done == top_level.len() && !top_level.is_empty() {
            theme::SUCCESS
        } else {
            theme::ACCENT
        };

        let label = format!(" {done}/{} ", top_level.len());
        let gauge = LineGauge::default()
            .ratio(ratio)
            .label(Span::styled(label, Style::default().fg(theme::TEXT_SECONDARY)))
            .filled_style(Style::default().fg(color))
            .unfilled_style(Style::default().fg(theme::BORDER))
            .line_set(ratatui::symbols::line::THICK);

        frame.render_widget(gauge, area);
    }

    fn render_body(&mut self, frame: &mut Frame, area: Rect) {
        if !self.view.supports_graph {
            self.render_log(frame, area);
            return;
        }
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
            .split(area);

        self.render_stage_list(frame, chunks[0]);
        self.render_log(frame, chunks[1]);
    }

    fn render_stage_list(&self, frame: &mut Frame, area: Rect) {
        let block = theme::styled_block("Stages", self.focus == Pane::Stages);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let rows = stage_rows(&self.view.graph);
        if rows.is_empty() {
            let waiting = Line::from(vec![
                Span::styled(
                    SPINNER_FRAMES[self.spinner_frame],
                    Style::default().fg(theme::ACCENT),
                ),
                Span::styled(" Waiting for stages...", Style::default().fg(theme::TEXT_MUTED)),
            ]);
            frame.render_widget(Paragraph::new(waiting), inner);
            return;
        }

        let selected = self.view.selected.id.as_deref();
        let lines: Vec<Line> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let (symbol, color) = theme::render_state_symbol(row.state);
                let symbol = if row.state == RenderState::Running {
                    SPINNER_FRAMES[self.spinner_frame]
                } else {
                    symbol
                };
                let indent = if row.depth > 0 { "  \u{2514} " } else { "" };
                let is_selected = selected == Some(row.id.as_str());

                let mut name_style = Style::default().fg(theme::TEXT_PRIMARY);
                if is_selected {
                    name_style = name_style.fg(theme::ACCENT).add_modifier(Modifier::BOLD);
                }

                let mut spans = vec![
                    Span::styled(indent, Style::default().fg(theme::BORDER)),
                    Span::styled(format!("{symbol} "), Style::default().fg(color)),
                    Span::styled(truncate_chars(&row.name, 28), name_style),
                ];
                if row.state == RenderState::Running {
                    spans.push(Span::styled(
                        format!(" {}%", row.complete_percent),
                        Style::default().fg(theme::TEXT_MUTED),
                    ));
                }
                if is_selected {
                    spans.push(Span::styled(" \u{25c0}", Style::default().fg(theme::ACCENT)));
                }

                let mut line = Line::from(spans);
                if i == self.stage_cursor && self.focus == Pane::Stages {
                    line = line.style(Style::default().bg(theme::SURFACE_HIGHLIGHT));
                }
                line
            })
            .collect();

        frame.render_widget(Paragraph::new(lines), inner);
    }

    /// Lines of the log panel: the run log, or each step with its expanded log.
    fn log_lines(&self) -> Vec<Line<'static>> {
        let mut lines = Vec::new();

        if let Some(ref log) = self.view.run_log {
            for line in &log.data {
                lines.push(Line::from(Span::styled(
                    line.clone(),
                    Style::default().fg(theme::TEXT_PRIMARY),
                )));
            }
            if log.has_more {
                lines.push(Line::from(Span::styled(
                    format!("{} more output pending", SPINNER_FRAMES[self.spinner_frame]),
                    Style::default().fg(theme::TEXT_MUTED),
                )));
            }
            return lines;
        }

        let Some(ref steps) = self.view.steps else {
            lines.push(Line::from(Span::styled(
                format!("{} Loading steps...", SPINNER_FRAMES[self.spinner_frame]),
                Style::default().fg(theme::TEXT_MUTED),
            )));
            return lines;
        };
        if self.view.no_steps {
            lines.push(Line::from(Span::styled(
                "There are no steps.",
                Style::default().fg(theme::TEXT_MUTED),
            )));
            return lines;
        }

        for (i, step) in steps.iter().enumerate() {
            let expanded = self.view.expanded_steps.contains(&step.id);
            let status = step.display_status();
            let arrow = if expanded { "\u{25be}" } else { "\u{25b8}" };
            let duration = step
                .duration_in_millis
                .map(format_duration_millis)
                .unwrap_or_default();

            let mut header = Line::from(vec![
                Span::styled(format!("{arrow} "), Style::default().fg(theme::TEXT_MUTED)),
                Span::styled(
                    format!("{:<10}", status),
                    Style::default().fg(theme::status_color(status)),
                ),
                Span::styled(
                    step.display_name.clone(),
                    Style::default().fg(theme::TEXT_PRIMARY),
                ),
                Span::styled(format!("  {duration}"), Style::default().fg(theme::TEXT_MUTED)),
            ]);
            if i == self.step_cursor && self.focus == Pane::Log {
                header = header.style(Style::default().bg(theme::SURFACE_HIGHLIGHT));
            }
            lines.push(header);

            if !expanded {
                continue;
            }
            match self.view.step_logs.get(&step.id) {
                Some(log) => {
                    for line in &log.data {
                        lines.push(Line::from(vec![
                            Span::styled("  \u{2502} ", Style::default().fg(theme::LOG_GUTTER)),
                            Span::styled(line.clone(), Style::default().fg(theme::TEXT_SECONDARY)),
                        ]));
                    }
                }
                None => lines.push(Line::from(Span::styled(
                    "  \u{2502} ...",
                    Style::default().fg(theme::TEXT_MUTED),
                ))),
            }
        }
        lines
    }

    fn render_log(&mut self, frame: &mut Frame, area: Rect) {
        let block = theme::styled_block(&self.view.title, self.focus == Pane::Log);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let lines = self.log_lines();
        let visible_height = inner.height as usize;
        let total_lines = lines.len();
        self.log_content_height = total_lines;

        let max_scroll = total_lines.saturating_sub(visible_height) as u16;
        let scroll = if self.view.scroll_to_bottom && !self.log_scroll_pinned {
            // Auto-scroll to bottom
            self.log_scroll = max_scroll;
            max_scroll
        } else {
            self.log_scroll = self.log_scroll.min(max_scroll);
            self.log_scroll
        };

        let paragraph = Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0));
        frame.render_widget(paragraph, inner);

        if total_lines > visible_height {
            let mut scrollbar_state = ScrollbarState::new(total_lines)
                .position(scroll as usize);
            frame.render_stateful_widget(
                Scrollbar::new(ScrollbarOrientation::VerticalRight)
                    .style(Style::default().fg(theme::TEXT_MUTED)),
                area,
                &mut scrollbar_state,
            );
        }
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let sub = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Length(1)])
            .split(area);

        let sep = Block::default()
            .borders(Borders::TOP)
            .border_style(Style::default().fg(theme::BORDER));
        frame.render_widget(sep, sub[0]);

        if let Some((ref message, is_error)) = self.notice {
            let color = if is_error { theme::ERROR } else { theme::WARNING };
            let footer = Line::from(vec![
                Span::styled("  \u{26a0} ", Style::default().fg(color)),
                Span::styled(message.clone(), Style::default().fg(color)),
                Span::styled("    [q]", Style::default().fg(theme::ACCENT)),
                Span::styled(" Quit", Style::default().fg(theme::TEXT_SECONDARY)),
            ]);
            frame.render_widget(Paragraph::new(footer), sub[1]);
            return;
        }

        let mut spans = vec![Span::raw("  ")];
        let key = |k: &'static str| Span::styled(k, Style::default().fg(theme::ACCENT));
        let label = |l: &'static str| Span::styled(l, Style::default().fg(theme::TEXT_SECONDARY));

        if self.view.supports_graph {
            spans.push(key("[Tab]"));
            spans.push(label(" Pane  "));
        }
        if self.focus == Pane::Stages && self.view.supports_graph {
            spans.push(key("[j/k]"));
            spans.push(label(" Stages  "));
            spans.push(key("[Enter]"));
            spans.push(label(" Open  "));
        } else {
            spans.push(key("[PgUp/Dn]"));
            spans.push(label(" Scroll  "));
            spans.push(key("[J/K]"));
            spans.push(label(" Steps  "));
            spans.push(key("[Enter]"));
            spans.push(label(" Expand  "));
        }
        spans.push(key("[r]"));
        spans.push(label(" Refresh  "));
        spans.push(key("[q]"));
        spans.push(label(" Quit"));

        if self.log_content_height > 0 {
            let pos = self.log_scroll as usize + 1;
            spans.push(Span::styled(
                format!("  {pos}/{}", self.log_content_height),
                Style::default().fg(theme::TEXT_MUTED),
            ));
        }

        frame.render_widget(Paragraph::new(Line::from(spans)), sub[1]);
    }
}
