//! Error types for the acquisition pipeline
//!
//! This module defines the error types used throughout the pipeline.
//! All errors implement the `std::error::Error` trait via `thiserror::Error`.
//!
//! Construction-time failures (bad configuration, transport bind/connect
//! failures, unknown worker classes) are fatal: the binary logs them,
//! prints to standard error, and exits with code 1. Everything else is a
//! runtime error that is logged and survived — the offending item is
//! dropped and the pipeline keeps running.

use thiserror::Error;

/// Pipeline error type
///
/// Represents all error conditions raised by the supervisor runtime.
///
/// # Variants
///
/// * `Config` - Invalid or missing configuration (fatal at construction)
/// * `Transport` - Socket bind/connect/send failure
/// * `Encode` - An item could not be encoded for its egress lane
/// * `Decode` - An ingress payload could not be parsed
/// * `UnknownWorkerClass` - No processor registered under the configured name
/// * `Processor` - The worker computation failed for one item
/// * `Io` - Filesystem error (filename-mode ingress, log sink)
/// * `Json` - Serialization error from the record codec
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// Item could not be encoded for egress
    #[error("encode error: {0}")]
    Encode(String),

    /// Ingress payload could not be parsed
    #[error("decode error: {0}")]
    Decode(String),

    /// No processor registered under this name
    #[error("unknown worker class: {0}")]
    UnknownWorkerClass(String),

    /// Worker computation failed
    #[error("processor error: {0}")]
    Processor(String),

    /// Filesystem error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Record codec error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type alias using PipelineError
///
/// Convenience type alias for `std::result::Result<T, PipelineError>`.
/// Used throughout the library for consistent error handling.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error() {
        let error = PipelineError::Config("missing section".to_string());
        assert_eq!(error.to_string(), "configuration error: missing section");
    }

    #[test]
    fn test_transport_error() {
        let error = PipelineError::Transport("bind failed".to_string());
        assert_eq!(error.to_string(), "transport error: bind failed");
    }

    #[test]
    fn test_encode_error() {
        let error = PipelineError::Encode("record is not text".to_string());
        assert_eq!(error.to_string(), "encode error: record is not text");
    }

    #[test]
    fn test_unknown_worker_class() {
        let error = PipelineError::UnknownWorkerClass("Worker9".to_string());
        assert_eq!(error.to_string(), "unknown worker class: Worker9");
    }

    #[test]
    fn test_processor_error() {
        let error = PipelineError::Processor("division by zero".to_string());
        assert_eq!(error.to_string(), "processor error: division by zero");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let error: PipelineError = io.into();
        assert!(matches!(error, PipelineError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json");
        let error: PipelineError = bad.unwrap_err().into();
        assert!(matches!(error, PipelineError::Json(_)));
    }

    #[test]
    fn test_error_debug() {
        let error = PipelineError::Config("test".to_string());
        let debug_str = format!("{:?}", error);
        assert!(debug_str.contains("Config"));
    }
}
