// error.rs — Error types for the engine and its collaborators.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use wf_goal::GoalError;

/// An executor could not run a step at all.
///
/// Ordinary recoverable failures are not errors: they come back as an
/// `ExecutionResult` with `Signal::Replan`. An `Err` here always fails the goal.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("no capability registered for action '{0}'")]
    UnknownAction(String),

    #[error("executor timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("executor failed: {0}")]
    Failed(String),
}

/// No replacement plan could be produced.
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("no capability registered for action '{action}'")]
    UnknownAction { action: String },

    #[error("replanner timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("replanner failed: {0}")]
    Failed(String),
}

/// Reflection failed. Never fatal to a goal.
#[derive(Debug, Error)]
pub enum ReflectionError {
    #[error("reflection timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("reflection failed: {0}")]
    Failed(String),
}

/// The knowledge sink could not store a record. Never fatal to a goal.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("I/O error on {path}: {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("knowledge sink timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("knowledge sink rejected the record: {0}")]
    Rejected(String),
}

/// Engine configuration could not be loaded or is inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors returned by `GoalEngine` operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("goal not found: {0}")]
    NotFound(Uuid),

    #[error("goal {0} is already running")]
    GoalBusy(Uuid),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Goal(#[from] GoalError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
