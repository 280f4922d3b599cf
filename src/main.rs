use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod app;
mod attach;
mod config;
mod handler;
mod ollama;
mod stream;
mod tui;
mod ui;

use app::App;
use config::Config;
use ollama::OllamaClient;

/// Diagnostics go to a file under the config dir; stderr belongs to the
/// TUI. The guard must stay alive for the whole run.
fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = dirs::config_dir()
        .context("could not determine config directory")?
        .join("conversa");
    std::fs::create_dir_all(&log_dir)?;

    let appender = tracing_appender::rolling::never(log_dir, "conversa.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logging()?;

    let config = Config::load().unwrap_or_else(|_| Config::new());
    let client = OllamaClient::new(config.base_url());
    info!(base_url = config.base_url(), "starting");

    let mut app = App::new(client, &config);
    app.load_models().await;

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = run(&mut terminal, &mut app).await;
    tui::restore()?;

    result
}

async fn run(terminal: &mut tui::Tui, app: &mut App) -> Result<()> {
    let mut events = tui::EventHandler::new();
    let (stream_tx, mut stream_rx) = mpsc::unbounded_channel();

    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        tokio::select! {
            Some(event) = events.next() => {
                handler::handle_event(app, event, &stream_tx).await?;
            }
            Some(event) = stream_rx.recv() => {
                app.apply_stream_event(event);
            }
        }
    }

    Ok(())
}
