//! Error types for the tree loading engine.
//!
//! Failures are contained at chunk or node granularity. Nothing here is meant to
//! abort rendering of unrelated nodes: the loader converts fetch errors into
//! per-chunk state transitions and events, and malformed hierarchy data never
//! produces an error at all.

use thiserror::Error;

/// Errors reported by a [`DataSource`](crate::source::DataSource).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Data source unavailable: {0}")]
    Unavailable(String),

    #[error("Query rejected by data source: {0}")]
    Query(String),

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode records: {0}")]
    Decode(String),
}

/// Errors raised by the chunk loader.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Invalid range [{start}, {end})")]
    InvalidRange { start: usize, end: usize },

    #[error("Invalid loader configuration: {0}")]
    InvalidConfig(String),

    #[error("Data source error: {0}")]
    Source(#[from] SourceError),
}

/// Errors raised by background execution.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker pool unavailable: {0}")]
    Unavailable(String),

    #[error("Operation '{operation}' failed: {reason}")]
    Failed { operation: String, reason: String },

    #[error("Operation cancelled")]
    Cancelled,
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Data source error: {0}")]
    Source(#[from] SourceError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Serialization(err.to_string())
    }
}
