//! Cafe-Dash CLI - sign in to the Cafe-Dash storefront from a terminal.
//!
//! Boots the session core, gates the main hub behind the route guard and
//! walks through the login flow when needed.

mod app;

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::{App, Command};
use cafedash_core::Config;

/// Log file name prefix inside the cache directory
const LOG_FILE_PREFIX: &str = "cafedash";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, and to a daily rolling file in `log_dir` when given.
/// The returned guard must be held until exit so the file writer flushes.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file = log_dir.and_then(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .build(dir)
            .ok()
    });
    let (file_layer, guard) = match file {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;
    if matches!(command, Command::Help) {
        println!("{}", app::USAGE);
        return Ok(());
    }

    let config = Config::load().context("Failed to load configuration")?;
    let log_dir = config.cache_dir().ok();
    let _log_guard = init_tracing(log_dir.as_deref());
    info!(api = %config.api_base_url, store = ?config.store, "Cafe-Dash starting");

    let mut app = App::new(config).context("Failed to set up the session")?;
    let result = app.execute(command).await;
    app.shutdown();

    if let Err(ref e) = result {
        warn!(error = %e, "Command failed");
    }
    info!("Cafe-Dash shutting down");
    result
}
