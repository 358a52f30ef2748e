//! Error types for the reconciliation engine.
//!
//! Most failures inside the engine never surface as `Error`: watchers and
//! commands turn them into a status with a detail payload. These variants
//! cover the edges where a caller asked for something that cannot be done
//! (unknown ids, unknown command kinds) or where setup itself failed.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building or driving the reconciliation tree.
#[derive(Debug, Error)]
pub enum Error {
    /// No command kind is registered under this name
    #[error("unknown command kind: {0}")]
    UnknownCommand(String),

    /// No group with this id exists in the tree
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// No instruction with this id exists in the tree
    #[error("instruction not found: {0}")]
    InstructionNotFound(String),

    /// An id is already used by another group or instruction
    #[error("duplicate id: {0}")]
    DuplicateId(String),

    /// User missing from the passwd database
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// A target path could not be derived from the parameters
    #[error("invalid path: {0:?}")]
    InvalidPath(PathBuf),

    /// An external tool could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying launch error
        source: std::io::Error,
    },

    /// An external tool ran but reported failure
    #[error("{program} exited with {status}")]
    ToolFailed {
        /// Program that failed
        program: String,
        /// Exit status as displayed by the OS
        status: String,
    },

    /// Filesystem notification error
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;
