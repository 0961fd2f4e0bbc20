// learning.rs — Distilled knowledge captured from a goal's execution.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What produced a learning record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LearningTrigger {
    /// A step signalled replan and a replacement fragment was spliced in.
    ReplanRecovery,
    /// The plan ran to exhaustion.
    SuccessfulCompletion,
}

impl fmt::Display for LearningTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearningTrigger::ReplanRecovery => write!(f, "replan_recovery"),
            LearningTrigger::SuccessfulCompletion => write!(f, "successful_completion"),
        }
    }
}

/// A reusable narrative persisted to the knowledge sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningRecord {
    pub source_goal_id: Uuid,
    pub trigger: LearningTrigger,
    pub narrative: String,
    pub timestamp: DateTime<Utc>,
}

impl LearningRecord {
    pub fn new(
        source_goal_id: Uuid,
        trigger: LearningTrigger,
        narrative: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source_goal_id,
            trigger,
            narrative: narrative.into(),
            timestamp,
        }
    }
}
