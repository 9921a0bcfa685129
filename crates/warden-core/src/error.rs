//! Shared error taxonomy.
//!
//! Every fallible operation in this crate returns one of these variants so
//! that call sites can match on "fail open" vs "fail closed" vs "this is a
//! real bug" instead of inferring a convention from context. Hook entry
//! points in `warden-hooks` never let a `WardenError` escape as a panic or
//! an unexpected exit code: they match on it and convert to 0 or 2.

use thiserror::Error;

/// Errors surfaced by the governor's substrate and rule engine.
#[derive(Debug, Error)]
pub enum WardenError {
    /// A `session_id` field failed the `[A-Za-z0-9_-]{8,64}` shape check.
    ///
    /// This is the one input-shape error that is fail-closed rather than
    /// fail-open, because a malformed id would otherwise be used to derive
    /// a state file path.
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// A lock file could not be opened or locked.
    #[error("lock error on {path}: {source}")]
    Lock {
        /// Path to the lock sidecar.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A state or audit file could not be read or written.
    #[error("io error on {path}: {source}")]
    Io {
        /// Path involved in the failing operation.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed or serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for fallible governor operations.
pub type WardenResult<T> = Result<T, WardenError>;
