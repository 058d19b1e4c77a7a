//! Tracing subscriber setup for the server and worker processes

use anyhow::{anyhow, Result};
use portfolio_config::{LogFormat, LoggingConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Filter from `--log-level`, else `RUST_LOG`, else `fallback`
fn env_filter(log_level: Option<&String>, fallback: &str) -> EnvFilter {
    match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to '{}'", level, fallback);
            EnvFilter::new(fallback)
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
    }
}

/// Initialize logging for the server from its configuration
pub fn init_logging(config: &LoggingConfig, log_level: Option<&String>) -> Result<()> {
    let filter = env_filter(log_level, config.level.as_str());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    debug!("Logging initialized ({:?} format)", config.format);
    Ok(())
}

/// Initialize tracing for worker processes (output to stderr, stdout is the IPC pipe)
pub fn init_worker_tracing(log_level: Option<&String>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(log_level, "info"))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize worker tracing: {}", e))?;

    debug!("Worker tracing initialized");
    Ok(())
}
