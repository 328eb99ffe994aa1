//! Error taxonomy for the task engine.

use thiserror::Error;

/// Unified error type returned by every fallible operation in this crate.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Missing or invalid settings discovered at startup. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Task registration rejected (unknown wait progression, etc). Fatal.
    #[error("registration error: {0}")]
    Registration(String),

    /// A queue-adapter operation (send/receive/delete/depth) failed loudly.
    #[error("queue error: {0}")]
    Queue(String),

    /// A handler raised instead of returning an outcome.
    #[error("handler error: {0}")]
    Handler(String),

    /// JSON (de)serialization of a command body or attributes failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `when` header could not be parsed as `dd/mm/yy HH:MM:SS`.
    #[error("invalid `when` value: {0}")]
    InvalidWhen(String),

    /// Catch-all for conditions that should not occur given the invariants.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskError {
    /// Whether retrying the operation that produced this error might succeed.
    ///
    /// Configuration and registration errors are never retryable; everything
    /// else (queue hiccups, handler exceptions) is.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TaskError::Configuration(_) | TaskError::Registration(_)
        )
    }

    /// Whether this error should abort startup rather than be logged and
    /// reconciled on the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TaskError::Configuration(_) | TaskError::Registration(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;
