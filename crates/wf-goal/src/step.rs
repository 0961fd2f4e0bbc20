// step.rs — Plan steps and the structured result of running one.
//
// A step names an executable capability (`action`), carries its arguments,
// and says who should run it. The engine never looks inside parameters or
// outputs; it only reads the explicit `signal` on the result to decide
// whether the plan can continue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Advisory risk level attached to a step. Does not gate execution.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    #[default]
    Low,
    Medium,
    High,
}

/// One unit of a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// Name identifying an executable capability (e.g., "read_file").
    pub action: String,

    /// Named arguments passed to the capability.
    #[serde(default)]
    pub parameters: Map<String, Value>,

    /// Who or what should run this step. Opaque to the engine.
    pub assigned_persona: String,

    /// Advisory risk level.
    #[serde(default)]
    pub risk: Risk,
}

impl Step {
    /// Create a step with no parameters and `Low` risk.
    pub fn new(action: impl Into<String>, assigned_persona: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            parameters: Map::new(),
            assigned_persona: assigned_persona.into(),
            risk: Risk::Low,
        }
    }

    /// Add a named parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Set the advisory risk level.
    pub fn with_risk(mut self, risk: Risk) -> Self {
        self.risk = risk;
        self
    }
}

/// Whether the step itself succeeded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Error,
}

/// What the step is telling the engine about the plan.
///
/// `Replan` means "the current plan cannot continue as-is". This replaces
/// scanning result payloads for a marker string.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    #[default]
    None,
    Replan,
    Error,
}

/// Outcome of running one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub status: StepStatus,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub signal: Signal,
}

impl ExecutionResult {
    /// The step succeeded and the plan continues.
    pub fn success(output: impl Into<Value>) -> Self {
        Self {
            status: StepStatus::Success,
            output: output.into(),
            signal: Signal::None,
        }
    }

    /// The step could not proceed and the plan needs a replacement fragment.
    pub fn replan(output: impl Into<Value>) -> Self {
        Self {
            status: StepStatus::Error,
            output: output.into(),
            signal: Signal::Replan,
        }
    }

    /// The step failed in a way a replan cannot fix.
    pub fn failure(output: impl Into<Value>) -> Self {
        Self {
            status: StepStatus::Error,
            output: output.into(),
            signal: Signal::Error,
        }
    }

    pub fn needs_replan(&self) -> bool {
        self.signal == Signal::Replan
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success && self.signal != Signal::Error
    }

    /// Short description of the output for reasons and logs.
    pub fn summary(&self) -> String {
        match &self.output {
            Value::Null => "no details".to_string(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// A successfully executed step in a goal's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub step: Step,
    #[serde(default)]
    pub output: Value,
    pub completed_at: DateTime<Utc>,
}
