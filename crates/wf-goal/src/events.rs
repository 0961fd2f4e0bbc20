// events.rs — Lifecycle events and notification dispatch.
//
// The engine emits events at key lifecycle points and whenever it absorbs
// a failure (reflection errors, knowledge-sink errors, store write errors,
// quarantined records). Absorbed failures never unwind goal state, so this
// is the path by which they become visible to operators.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GoalError;
use crate::goal::GoalState;
use crate::learning::LearningTrigger;

/// Events emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GoalEvent {
    /// A new goal was accepted.
    GoalSubmitted {
        goal_id: Uuid,
        description: String,
        steps: usize,
        timestamp: DateTime<Utc>,
    },

    /// A goal changed state.
    GoalStateChanged {
        goal_id: Uuid,
        from_state: String,
        to_state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// The step at `index` succeeded and the cursor moved past it.
    StepCompleted {
        goal_id: Uuid,
        index: usize,
        action: String,
        timestamp: DateTime<Utc>,
    },

    /// A replacement fragment replaced the step at `index`.
    PlanSpliced {
        goal_id: Uuid,
        index: usize,
        replaced_action: String,
        inserted: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// The circuit breaker stopped a goal.
    BreakerTripped {
        goal_id: Uuid,
        action: String,
        cause: String,
        timestamp: DateTime<Utc>,
    },

    /// A learning record reached the knowledge sink.
    LearningCaptured {
        goal_id: Uuid,
        trigger: LearningTrigger,
        timestamp: DateTime<Utc>,
    },

    /// The knowledge sink rejected or timed out on a write.
    KnowledgeWriteFailed {
        goal_id: Uuid,
        trigger: LearningTrigger,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Reflection failed or timed out; treated as no narrative.
    ReflectionFailed {
        goal_id: Uuid,
        trigger: LearningTrigger,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Persisting a goal record failed; in-memory state is unaffected.
    StoreWriteFailed {
        goal_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A stored record could not be loaded and was moved aside.
    RecordQuarantined {
        file_name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// An operator forced a goal to completion.
    GoalForceCompleted {
        goal_id: Uuid,
        note: String,
        timestamp: DateTime<Utc>,
    },
}

impl GoalEvent {
    /// Get the event type name as a string.
    pub fn event_type(&self) -> &str {
        match self {
            GoalEvent::GoalSubmitted { .. } => "goal_submitted",
            GoalEvent::GoalStateChanged { .. } => "goal_state_changed",
            GoalEvent::StepCompleted { .. } => "step_completed",
            GoalEvent::PlanSpliced { .. } => "plan_spliced",
            GoalEvent::BreakerTripped { .. } => "breaker_tripped",
            GoalEvent::LearningCaptured { .. } => "learning_captured",
            GoalEvent::KnowledgeWriteFailed { .. } => "knowledge_write_failed",
            GoalEvent::ReflectionFailed { .. } => "reflection_failed",
            GoalEvent::StoreWriteFailed { .. } => "store_write_failed",
            GoalEvent::RecordQuarantined { .. } => "record_quarantined",
            GoalEvent::GoalForceCompleted { .. } => "goal_force_completed",
        }
    }

    /// The goal this event concerns, if any.
    pub fn goal_id(&self) -> Option<Uuid> {
        match self {
            GoalEvent::GoalSubmitted { goal_id, .. }
            | GoalEvent::GoalStateChanged { goal_id, .. }
            | GoalEvent::StepCompleted { goal_id, .. }
            | GoalEvent::PlanSpliced { goal_id, .. }
            | GoalEvent::BreakerTripped { goal_id, .. }
            | GoalEvent::LearningCaptured { goal_id, .. }
            | GoalEvent::KnowledgeWriteFailed { goal_id, .. }
            | GoalEvent::ReflectionFailed { goal_id, .. }
            | GoalEvent::StoreWriteFailed { goal_id, .. }
            | GoalEvent::GoalForceCompleted { goal_id, .. } => Some(*goal_id),
            GoalEvent::RecordQuarantined { .. } => None,
        }
    }

    /// Helper to create a GoalStateChanged event.
    pub fn state_changed(goal_id: Uuid, from: &GoalState, to: &GoalState) -> Self {
        GoalEvent::GoalStateChanged {
            goal_id,
            from_state: from.to_string(),
            to_state: to.to_string(),
            reason: to.reason().map(str::to_string),
            timestamp: Utc::now(),
        }
    }
}

/// Trait for receiving goal events.
///
/// Implementations decide what to do with each event: append to a file,
/// forward to a webhook, collect in memory for a test, etc.
pub trait NotificationSink: Send + Sync {
    /// Handle an event. Errors are logged but don't stop the engine.
    fn send(&self, event: &GoalEvent) -> Result<(), GoalError>;
}

/// Logs events as JSONL to a file.
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl NotificationSink for LogSink {
    fn send(&self, event: &GoalEvent) -> Result<(), GoalError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| GoalError::IoError {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| GoalError::IoError {
                path: self.path.display().to_string(),
                source,
            })?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json).map_err(|source| GoalError::IoError {
            path: self.path.display().to_string(),
            source,
        })?;

        Ok(())
    }
}

/// Dispatches events to multiple sinks.
///
/// Errors from individual sinks are logged (via tracing) but don't
/// prevent other sinks from receiving the event.
#[derive(Default)]
pub struct EventDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl EventDispatcher {
    /// Create a new dispatcher with no sinks.
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Add a notification sink.
    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Dispatch an event to all sinks.
    pub fn dispatch(&self, event: &GoalEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(event) {
                tracing::warn!("notification sink error: {}", e);
            }
        }
    }
}
