//! Tracing/logging initialization

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize the tracing subscriber based on configuration
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    // Worker threads are named per generation, so thread names carry
    // more than thread ids here.
    match config.format.as_str() {
        "json" => {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true);
            subscriber.with(fmt_layer).try_init()?;
        }
        _ => {
            let fmt_layer = fmt::layer()
                .with_target(true)
                .with_thread_names(true);
            subscriber.with(fmt_layer).try_init()?;
        }
    }

    Ok(())
}
