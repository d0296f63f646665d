//! Logging infrastructure for the pipeline
//!
//! Structured logging with dual output: an append-mode file at
//! `<logs_path>/<globalname>.log` plus stdout for tailing. Verbosity is
//! configurable via `RUST_LOG`.

use std::fs;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialize the global logging subscriber.
///
/// Creates the log directory if needed and appends to
/// `<log_dir>/<globalname>.log`. Fails if a global subscriber is
/// already installed.
pub fn init_logging(log_dir: &str, globalname: &str) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, format!("{globalname}.log"));
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false);

    let stdout_layer = tracing_subscriber::fmt::layer().with_writer(io::stdout);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_creates_log_file_and_rejects_reinit() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let log_dir = log_dir.to_str().unwrap();

        let guard = init_logging(log_dir, "Supervisor-TEST");
        assert!(guard.is_ok());
        tracing::info!("log sink smoke test");
        assert!(std::path::Path::new(log_dir)
            .join("Supervisor-TEST.log")
            .exists());

        // The global subscriber is process-wide; a second init must fail
        // instead of silently replacing it.
        let again = init_logging(log_dir, "Supervisor-TEST2");
        assert!(again.is_err());
    }
}
