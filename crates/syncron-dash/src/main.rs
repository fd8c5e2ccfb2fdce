mod app;
mod config;
mod theme;
mod ui;

use anyhow::{Context, Result};
use app::App;
use clap::Parser;
use config::{init_logging, load_config, Args};
use crossterm::{
    event::{DisableFocusChange, EnableFocusChange, EventStream},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{io, sync::Arc, time::Duration};
use syncron_live::HttpApi;
use tracing::info;

const REDRAW_MS: u64 = 100;

type Tui = Terminal<CrosstermBackend<io::Stdout>>;

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(Args::parse())?;
    init_logging();
    info!(event = "startup", server = %config.server, chunk_bytes = config.sync.chunk_bytes);

    let api = HttpApi::new(config.server.clone(), config.timeout)
        .context("failed to build http client")?;
    let mut app = App::new(Arc::new(api), &config);
    app.sync_session().await;

    let mut terminal = setup_terminal()?;
    let result = run_app(&mut terminal, &mut app).await;
    restore_terminal(&mut terminal)?;
    app.shutdown().await;
    result
}

fn setup_terminal() -> Result<Tui> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableFocusChange)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Tui) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), DisableFocusChange, LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

async fn run_app(terminal: &mut Tui, app: &mut App) -> Result<()> {
    let mut events = EventStream::new();
    let mut redraw = tokio::time::interval(Duration::from_millis(REDRAW_MS));
    loop {
        terminal.draw(|frame| ui::render(frame, app))?;
        tokio::select! {
            _ = redraw.tick() => {}
            maybe_event = events.next() => match maybe_event {
                Some(Ok(event)) => app.handle_event(event).await,
                Some(Err(err)) => return Err(err).context("failed to read terminal input"),
                None => break,
            },
        }
        if app.should_quit() {
            break;
        }
    }
    Ok(())
}
