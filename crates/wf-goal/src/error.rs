// error.rs — Error types for the goal lifecycle subsystem.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during goal lifecycle and store operations.
#[derive(Debug, Error)]
pub enum GoalError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize/deserialize goal data.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The requested goal was not found.
    #[error("goal not found: {0}")]
    NotFound(Uuid),

    /// Invalid state transition.
    #[error("invalid transition from {from} to {to} for goal {goal_id}")]
    InvalidTransition {
        goal_id: Uuid,
        from: String,
        to: String,
    },

    /// A splice was requested at an index that has no step.
    #[error("cannot splice goal {goal_id} at index {index}: plan has {len} step(s)")]
    InvalidSplice {
        goal_id: Uuid,
        index: usize,
        len: usize,
    },

    /// A record's cursor points past the end of its plan.
    #[error("goal {goal_id} has current_step_index {index} but its plan has {len} step(s)")]
    CursorOutOfRange {
        goal_id: Uuid,
        index: usize,
        len: usize,
    },

    /// A notification dispatch failed (non-fatal).
    #[error("notification error: {0}")]
    NotificationError(String),
}
