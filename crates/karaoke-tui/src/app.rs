use crate::event::TerminalEventReader;
use crate::screens::run_details::{RunDetailsAction, RunDetailsState};
use crate::widgets::help::render_help_overlay;
use anyhow::{Context, Result};
use crossterm::event::{Event as CrosstermEvent, KeyEventKind};
use karaoke_core::{KaraokeEvent, RunDetailsHandle, RunDetailsPipeline, RunDetailsView};
use ratatui::Frame;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Unified event type for the app event loop.
pub enum AppEvent {
    /// Terminal input event.
    Terminal(CrosstermEvent),
    /// Progress event from the mounted run view.
    Karaoke(KaraokeEvent),
    /// Periodic tick for UI refresh.
    Tick,
}

/// Main application state.
pub struct App {
    screen: RunDetailsState,
    show_help: bool,
    should_quit: bool,
    handle: RunDetailsHandle,
    view_rx: watch::Receiver<RunDetailsView>,
    events_rx: mpsc::UnboundedReceiver<KaraokeEvent>,
    /// Task driving the pipeline; `None` once joined.
    task: Option<JoinHandle<()>>,
}

impl App {
    /// Spawn the pipeline and build the screen around its view.
    pub fn new(
        pipeline: RunDetailsPipeline,
        events_rx: mpsc::UnboundedReceiver<KaraokeEvent>,
    ) -> Self {
        let handle = pipeline.handle();
        let view_rx = pipeline.subscribe_view();
        let screen = RunDetailsState::new(view_rx.borrow().clone());
        let task = tokio::spawn(pipeline.run());

        Self {
            screen,
            show_help: false,
            should_quit: false,
            handle,
            view_rx,
            events_rx,
            task: Some(task),
        }
    }

    /// Run the main event loop.
    pub async fn run(&mut self, terminal: &mut ratatui::DefaultTerminal) -> Result<()> {
        let mut event_reader = TerminalEventReader::new();
        let mut tick_interval = tokio::time::interval(std::time::Duration::from_millis(100));

        while !self.should_quit {
            // Draw
            terminal.draw(|frame| self.render(frame))?;

            // Collect events
            let events = self.collect_events(&mut event_reader, &mut tick_interval).await;

            for event in events {
                self.handle_event(event);
            }

            if self.view_rx.has_changed().unwrap_or(false) {
                let view = self.view_rx.borrow_and_update().clone();
                self.screen.set_view(view);
            }
        }

        self.shutdown().await
    }

    /// Stop the pipeline and wait for it to unmount.
    async fn shutdown(&mut self) -> Result<()> {
        self.handle.shutdown();
        if let Some(task) = self.task.take() {
            task.await.context("Run view task failed")?;
        }
        Ok(())
    }

    /// Collect all pending events (non-blocking after first tick).
    async fn collect_events(
        &mut self,
        reader: &mut TerminalEventReader,
        tick_interval: &mut tokio::time::Interval,
    ) -> Vec<AppEvent> {
        let mut events = Vec::new();

        // Wait for at least one tick
        tick_interval.tick().await;
        events.push(AppEvent::Tick);

        // Drain terminal events
        while let Some(ev) = reader.try_recv() {
            events.push(AppEvent::Terminal(ev));
        }

        // Drain run view events
        while let Ok(ev) = self.events_rx.try_recv() {
            events.push(AppEvent::Karaoke(ev));
        }

        events
    }

    /// Handle a single app event.
    fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Tick => self.screen.on_tick(),

            AppEvent::Terminal(CrosstermEvent::Key(key))
                if key.kind == KeyEventKind::Press =>
            {
                // Help overlay intercepts all keys
                if self.show_help {
                    self.show_help = false;
                    return;
                }
                let action = self.screen.handle_key(key);
                self.handle_action(action);
            }

            AppEvent::Terminal(CrosstermEvent::Mouse(mouse)) => {
                let action = self.screen.handle_mouse(mouse);
                self.handle_action(action);
            }

            AppEvent::Terminal(_) => {} // Resize, focus, paste events

            AppEvent::Karaoke(event) => self.screen.handle_karaoke_event(event),
        }
    }

    fn handle_action(&mut self, action: RunDetailsAction) {
        match action {
            RunDetailsAction::None => {}
            RunDetailsAction::Quit => self.should_quit = true,
            RunDetailsAction::ToggleHelp => self.show_help = !self.show_help,
            RunDetailsAction::Input(input) => {
                if !self.handle.send(input) {
                    // the pipeline is gone; nothing left to follow
                    self.should_quit = true;
                }
            }
        }
    }

    /// Render the current screen.
    fn render(&mut self, frame: &mut Frame) {
        let area = frame.area();

        self.screen.render(frame, area);

        if self.show_help {
            render_help_overlay(frame, area, self.screen.view.supports_graph);
        }
    }
}
