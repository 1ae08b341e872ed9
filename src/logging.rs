//! Tracing subscriber setup.
//!
//! Standard output carries the protocol, so logs go to the configured file or
//! to standard error, never to stdout.

use crate::config::ServerConfig;
use crate::error::{ConfigError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` takes precedence over the configured level. A log file that
/// cannot be opened falls back to standard error with a warning.
pub fn init(config: &ServerConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_directive()));

    let mut open_failure = None;
    let writer = match &config.log_file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
            Err(e) => {
                open_failure = Some((path.display().to_string(), e));
                BoxMakeWriter::new(std::io::stderr)
            }
        },
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let layer = match (config.log_json, config.show_timestamps) {
        (true, true) => fmt::layer().json().with_writer(writer).boxed(),
        (true, false) => fmt::layer().json().without_time().with_writer(writer).boxed(),
        (false, true) => fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        (false, false) => fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .without_time()
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    if let Some((path, e)) = open_failure {
        warn!(path = %path, error = %e, "Failed to open log file, logging to stderr");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let config = ServerConfig::builder()
            .log_file(std::env::temp_dir().join("mcp-runtime-logging-test.log"))
            .show_timestamps(false)
            .build()
            .unwrap();

        // Whichever call installs the subscriber first, the next one must fail.
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
