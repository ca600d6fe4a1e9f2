//! Error types for genexpi

use thiserror::Error;

/// genexpi error type
///
/// Per-task numerical divergence is not an error at this level: it is reported
/// in the task's result so that sibling tasks keep running.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Runtime environment is not ready to execute batches.
    #[error("Configuration error: {0}. Fix the configuration and retry")]
    Configuration(String),

    /// Device context or batch buffers could not be allocated.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Invalid input (dataset, task or search configuration).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
