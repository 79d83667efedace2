mod app;
mod event;
pub mod screens;
mod theme;
pub mod widgets;

use anyhow::{Context, Result};
use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use karaoke_core::{KaraokeEvent, RunDetailsPipeline};
use tokio::sync::mpsc;

/// Launch the full-screen view for a run that has not been mounted yet.
///
/// This sets up the terminal (alternate screen, raw mode, mouse capture),
/// drives the pipeline on a background task, and restores the terminal on
/// exit (including panics).
pub async fn run_tui(
    pipeline: RunDetailsPipeline,
    events: mpsc::UnboundedReceiver<KaraokeEvent>,
) -> Result<()> {
    // Install a panic hook that restores the terminal before printing
    // the panic message, so a crash does not leave the terminal garbled.
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = crossterm::execute!(std::io::stdout(), DisableMouseCapture);
        ratatui::restore();
        original_hook(panic_info);
    }));

    let mut terminal = ratatui::init();
    crossterm::execute!(std::io::stdout(), EnableMouseCapture)
        .context("Failed to enable mouse capture")?;

    let mut app = app::App::new(pipeline, events);
    let result = app.run(&mut terminal).await;

    let _ = crossterm::execute!(std::io::stdout(), DisableMouseCapture);
    ratatui::restore();

    result
}
