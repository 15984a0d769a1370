//! The Chorus error enum — one variant per domain failure kind.
//!
//! Pure validators (names, permission patterns, the path jail) fail fast with
//! these; the tool loop folds most handler failures back into tool-result
//! messages and only lets `Cancelled` and provider errors escape.

use thiserror::Error;

/// Every domain error Chorus components can produce.
#[derive(Debug, Error)]
pub enum ChorusError {
    #[error(
        "invalid agent name {0:?}: names must be 2-32 lowercase alphanumeric \
         characters or hyphens, starting and ending with alphanumeric"
    )]
    InvalidAgentName(String),

    #[error("agent '{0}' already exists")]
    AgentExists(String),

    #[error("agent '{0}' not found")]
    AgentNotFound(String),

    #[error("invalid permission pattern {pattern:?}: {reason}")]
    InvalidPermissionPattern { pattern: String, reason: String },

    #[error("unknown permission preset '{0}' (available: open, standard, locked)")]
    UnknownPreset(String),

    #[error("path {0:?} resolves outside the workspace")]
    PathTraversal(String),

    #[error("string not found in {0}")]
    StringNotFound(String),

    #[error("string appears {count} times in {path} — must be unique")]
    AmbiguousMatch { path: String, count: usize },

    #[error("file appears to be binary: {0}")]
    BinaryFile(String),

    #[error("file not found in workspace: {0}")]
    FileNotFound(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("session id '{0}' is ambiguous — use a longer prefix")]
    AmbiguousSession(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("permission denied for action '{0}'")]
    PermissionDenied(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("blocking task failed: {0}")]
    Task(String),
}

/// Shorthand used throughout the workspace.
pub type Result<T, E = ChorusError> = std::result::Result<T, E>;
