//! Error types for sandbox provisioning.

use thiserror::Error;

/// Top-level error type for provisioning operations.
///
/// A pipeline that fails on the remote side is not an `Error`; it is recorded
/// as a [`FailureRecord`](crate::state::FailureRecord). These variants cover
/// invalid input and infrastructure the pipeline itself depends on.
#[derive(Error, Debug)]
pub enum Error {
    /// The provisioning request was rejected before any remote call.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A call to the remote sandbox service failed.
    #[error("{operation} failed: {message}")]
    Remote { operation: String, message: String },

    /// A secret could not be resolved.
    #[error("secret {reference} could not be resolved: {reason}")]
    Secret { reference: String, reason: String },

    /// The state store could not read or write a record.
    #[error("state store error: {0}")]
    Store(String),

    /// No persisted state exists for the pipeline.
    #[error("pipeline {0} not found")]
    NotFound(String),

    /// A shell command could not be composed safely.
    #[error("failed to build command: {0}")]
    Command(String),

    /// Settings error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The scheduler refused a re-invocation request.
    #[error("scheduler error: {0}")]
    Schedule(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// State record could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Builds a [`Error::Remote`] for the named operation.
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Remote {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, Error>;
