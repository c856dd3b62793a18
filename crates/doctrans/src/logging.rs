// Logging setup, powered by tracing-subscriber.
//
// Library code logs through the `log` macros and opens `tracing` spans
// around job runs. `tracing_log::LogTracer` routes `log` records into the
// subscriber so both end up in the same output with span context.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{expand_home, LogFormat, LoggingConfig};
use crate::error::LoggingError;

/// Crates whose chatter is capped regardless of the configured level.
const QUIET_TARGETS: &[(&str, &str)] = &[("rusqlite", "warn"), ("tokio", "warn")];

/// Builds the filter from the configured level, unless `RUST_LOG` is set.
pub fn build_env_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(from_env) = std::env::var(EnvFilter::DEFAULT_ENV) {
        if !from_env.trim().is_empty() {
            return EnvFilter::try_new(&from_env).map_err(|e| LoggingError::InvalidFilter {
                filter: from_env.clone(),
                reason: e.to_string(),
            });
        }
    }

    let mut directives = vec![level.to_string()];
    for (target, lvl) in QUIET_TARGETS {
        directives.push(format!("{}={}", target, lvl));
    }
    let filter = directives.join(",");
    EnvFilter::try_new(&filter).map_err(|e| LoggingError::InvalidFilter {
        filter,
        reason: e.to_string(),
    })
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn console_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(true)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    }
}

fn file_layer(path: &Path, format: LogFormat) -> Result<BoxedLayer, LoggingError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| LoggingError::OpenFile {
            path: path.to_path_buf(),
            source,
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::OpenFile {
            path: path.to_path_buf(),
            source,
        })?;
    let writer = Mutex::new(file);

    Ok(match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_target(true)
            .boxed(),
    })
}

/// Installs the global subscriber: stderr console output in the configured
/// format, plus an append-mode log file when one is configured.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_env_filter(&config.level)?;

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config.format)];
    if let Some(file) = &config.file {
        layers.push(file_layer(&expand_home(file), config.format)?);
    }

    // ok() in case a logger is already installed
    tracing_log::LogTracer::init().ok();

    tracing_subscriber::registry()
        .with(layers.with_filter(filter))
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))?;

    tracing::debug!(
        "Logging initialized: level={}, format={:?}, file={:?}",
        config.level,
        config.format,
        config.file
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_filter_from_level() {
        std::env::remove_var(EnvFilter::DEFAULT_ENV);
        assert!(build_env_filter("debug").is_ok());
        assert!(build_env_filter("doctrans=trace,info").is_ok());
    }

    #[test]
    #[serial]
    fn test_invalid_level() {
        std::env::remove_var(EnvFilter::DEFAULT_ENV);
        let err = build_env_filter("doctrans=[[[").unwrap_err();
        assert!(matches!(err, LoggingError::InvalidFilter { .. }));
    }

    #[test]
    fn test_file_layer_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("doctrans.log");
        file_layer(&path, LogFormat::Json).unwrap();
        assert!(path.exists());
    }
}
