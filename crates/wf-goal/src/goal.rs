// goal.rs — Goal: the top-level unit of work and its lifecycle.
//
// A Goal owns an ordered plan of steps and a cursor into it. The state
// machine enforces a valid lifecycle:
//   Pending → Active ⇄ Replanning → Completed | Failed | Aborted
// Terminal states are absorbing. The only way out of the normal graph is
// the administrative override (`force_complete`).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::GoalError;
use crate::step::{Step, StepRecord};

/// `execution_count` value marking a goal as exempt from further automatic
/// execution. Set by the administrative override.
pub const EXEMPT_EXECUTION_COUNT: u32 = 999;

/// The lifecycle state of a Goal.
///
/// Serializes as `{"state": "active"}`; the terminal failure variants carry
/// a human-readable reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GoalState {
    /// Submitted, no step has run yet.
    Pending,

    /// Steps are executing. The only state in which a step runs.
    Active,

    /// A step signalled replan and a replacement fragment is being obtained.
    Replanning,

    /// The plan ran to exhaustion (or an operator forced completion).
    Completed,

    /// A planning failure or an unrecoverable step error ended the goal.
    Failed { reason: String },

    /// The circuit breaker tripped or the goal was cancelled.
    Aborted { reason: String },
}

impl fmt::Display for GoalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoalState::Pending => write!(f, "pending"),
            GoalState::Active => write!(f, "active"),
            GoalState::Replanning => write!(f, "replanning"),
            GoalState::Completed => write!(f, "completed"),
            GoalState::Failed { .. } => write!(f, "failed"),
            GoalState::Aborted { .. } => write!(f, "aborted"),
        }
    }
}

impl GoalState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GoalState::Completed | GoalState::Failed { .. } | GoalState::Aborted { .. }
        )
    }

    /// The reason attached to a `Failed` or `Aborted` state.
    pub fn reason(&self) -> Option<&str> {
        match self {
            GoalState::Failed { reason } | GoalState::Aborted { reason } => Some(reason),
            _ => None,
        }
    }

    /// Check whether transitioning from this state to `next` is valid.
    pub fn can_transition_to(&self, next: &GoalState) -> bool {
        matches!(
            (self, next),
            (GoalState::Pending, GoalState::Active)
                | (GoalState::Pending, GoalState::Aborted { .. })
                | (GoalState::Active, GoalState::Replanning)
                | (GoalState::Active, GoalState::Completed)
                | (GoalState::Active, GoalState::Failed { .. })
                | (GoalState::Active, GoalState::Aborted { .. })
                | (GoalState::Replanning, GoalState::Active)
                | (GoalState::Replanning, GoalState::Failed { .. })
                | (GoalState::Replanning, GoalState::Aborted { .. })
        )
    }
}

/// A goal: a description, a plan, and where execution stands within it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    /// Unique identifier.
    pub id: Uuid,

    /// Free-text objective.
    pub description: String,

    /// Current lifecycle state.
    #[serde(flatten)]
    pub state: GoalState,

    /// Ordered steps. Older records call this `sub_tasks`.
    #[serde(alias = "sub_tasks", default)]
    pub plan: Vec<Step>,

    /// Cursor into `plan`. Always `0 <= index <= plan.len()`.
    #[serde(default)]
    pub current_step_index: usize,

    /// Per-action attempt counts mirrored from the circuit breaker for
    /// diagnostics. Cleared on every terminal transition.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub execution_counters: BTreeMap<String, u32>,

    /// `EXEMPT_EXECUTION_COUNT` marks the goal as exempt from automatic execution.
    #[serde(default)]
    pub execution_count: u32,

    /// Set on the first transition to `Active`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// Number of recovered failures (successful replans) over the goal's life.
    #[serde(default)]
    pub failures: u32,

    /// Steps that completed successfully, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<StepRecord>,

    /// Set only on a terminal transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    /// Operator note set by the administrative override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_note: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Goal {
    /// Create a new Goal in the Pending state.
    pub fn new(description: impl Into<String>, plan: Vec<Step>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            state: GoalState::Pending,
            plan,
            current_step_index: 0,
            execution_counters: BTreeMap::new(),
            execution_count: 0,
            start_time: None,
            failures: 0,
            history: Vec::new(),
            completion_time: None,
            completion_note: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new state, stamped with the current time.
    pub fn transition(&mut self, new_state: GoalState) -> Result<(), GoalError> {
        self.transition_at(new_state, Utc::now())
    }

    /// Transition to a new state at `at`. Returns an error if the transition
    /// is invalid.
    ///
    /// Entering `Active` for the first time records `start_time`. Entering a
    /// terminal state records `completion_time` and clears the counter mirror.
    pub fn transition_at(&mut self, new_state: GoalState, at: DateTime<Utc>) -> Result<(), GoalError> {
        if !self.state.can_transition_to(&new_state) {
            return Err(GoalError::InvalidTransition {
                goal_id: self.id,
                from: self.state.to_string(),
                to: new_state.to_string(),
            });
        }
        if new_state == GoalState::Active && self.start_time.is_none() {
            self.start_time = Some(at);
        }
        if new_state.is_terminal() {
            self.completion_time = Some(at);
            self.execution_counters.clear();
        }
        self.state = new_state;
        self.updated_at = at;
        Ok(())
    }

    /// The step at the cursor, if the plan is not exhausted.
    pub fn current_step(&self) -> Option<&Step> {
        self.plan.get(self.current_step_index)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_step_index >= self.plan.len()
    }

    pub fn is_exempt(&self) -> bool {
        self.execution_count >= EXEMPT_EXECUTION_COUNT
    }

    /// Check the cursor invariant `0 <= current_step_index <= plan.len()`.
    pub fn validate(&self) -> Result<(), GoalError> {
        if self.current_step_index > self.plan.len() {
            return Err(GoalError::CursorOutOfRange {
                goal_id: self.id,
                index: self.current_step_index,
                len: self.plan.len(),
            });
        }
        Ok(())
    }

    /// Replace the step at the cursor with `proposal`.
    ///
    /// The cursor does not move, so the first step of the proposal runs next.
    /// `plan := plan[..index] + proposal + plan[index + 1..]`
    pub fn splice_current(&mut self, proposal: Vec<Step>) -> Result<(), GoalError> {
        let index = self.current_step_index;
        if index >= self.plan.len() {
            return Err(GoalError::InvalidSplice {
                goal_id: self.id,
                index,
                len: self.plan.len(),
            });
        }
        self.plan.splice(index..=index, proposal);
        Ok(())
    }

    /// Append the step at the cursor to history and advance by one.
    pub fn record_success(&mut self, output: Value, at: DateTime<Utc>) {
        if let Some(step) = self.current_step().cloned() {
            self.history.push(StepRecord {
                step,
                output,
                completed_at: at,
            });
            self.current_step_index += 1;
            self.updated_at = at;
        }
    }

    /// Whether the administrative override has already been applied with `note`.
    pub fn is_force_completed_with(&self, note: &str) -> bool {
        self.state == GoalState::Completed
            && self.is_exempt()
            && self.completion_note.as_deref() == Some(note)
    }

    /// Administrative override: mark the goal completed regardless of its state.
    ///
    /// Clears the plan, records the note, and marks the goal exempt from
    /// further automatic execution. Returns `false` and changes nothing if the
    /// override was already applied with the same note.
    pub fn force_complete(&mut self, note: impl Into<String>, at: DateTime<Utc>) -> bool {
        let note = note.into();
        if self.is_force_completed_with(&note) {
            return false;
        }
        self.state = GoalState::Completed;
        self.completion_note = Some(note);
        self.completion_time = Some(at);
        self.plan.clear();
        self.current_step_index = 0;
        self.execution_counters.clear();
        self.execution_count = EXEMPT_EXECUTION_COUNT;
        self.updated_at = at;
        true
    }
}
