// collaborators.rs — The narrow interfaces the engine drives.
//
// Executor, replanner, reflection and knowledge sink all cross into
// external systems (tools, network, a language model). Each call may
// suspend and is wrapped in its own timeout by the engine.

use std::sync::Arc;

use async_trait::async_trait;

use wf_goal::{ExecutionResult, LearningRecord, Step, StepRecord};

use crate::config::WorkspaceLayout;
use crate::error::{ExecutorError, KnowledgeError, PlanningError, ReflectionError};
use crate::knowledge::{JsonlKnowledgeSink, NullKnowledgeSink};
use crate::registry::CapabilityRegistry;

/// Runs one step.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute a step. Recoverable failures are reported through the
    /// result's signal, not as `Err`.
    async fn execute(&self, step: &Step) -> Result<ExecutionResult, ExecutorError>;

    /// Whether this executor can run `action`. Checked when a plan is
    /// submitted and when a replacement fragment arrives.
    fn supports(&self, _action: &str) -> bool {
        true
    }
}

/// Proposes a replacement for a step that signalled replan.
#[async_trait]
pub trait Replanner: Send + Sync {
    /// An empty proposal means "no recovery". Not assumed idempotent; the
    /// engine never retries a call.
    async fn propose_plan(
        &self,
        goal_description: &str,
        failed_step: &Step,
        history: &[StepRecord],
    ) -> Result<Vec<Step>, PlanningError>;
}

/// Turns a recovery or a completed goal into an optional narrative.
#[async_trait]
pub trait Reflection: Send + Sync {
    async fn on_replan(
        &self,
        original: &Step,
        new_steps: &[Step],
        history: &[StepRecord],
    ) -> Result<Option<String>, ReflectionError>;

    async fn on_success(
        &self,
        goal_description: &str,
        history: &[StepRecord],
    ) -> Result<Option<String>, ReflectionError>;
}

/// Durable store for learning records.
#[async_trait]
pub trait KnowledgeSink: Send + Sync {
    async fn add_knowledge(&self, record: &LearningRecord) -> Result<(), KnowledgeError>;
}

/// A replanner that never has a recovery plan.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRecovery;

#[async_trait]
impl Replanner for NoRecovery {
    async fn propose_plan(
        &self,
        _goal_description: &str,
        _failed_step: &Step,
        _history: &[StepRecord],
    ) -> Result<Vec<Step>, PlanningError> {
        Ok(Vec::new())
    }
}

/// Reflection that never produces a narrative.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReflection;

#[async_trait]
impl Reflection for NoReflection {
    async fn on_replan(
        &self,
        _original: &Step,
        _new_steps: &[Step],
        _history: &[StepRecord],
    ) -> Result<Option<String>, ReflectionError> {
        Ok(None)
    }

    async fn on_success(
        &self,
        _goal_description: &str,
        _history: &[StepRecord],
    ) -> Result<Option<String>, ReflectionError> {
        Ok(None)
    }
}

/// The set of collaborators an engine is built with.
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn Executor>,
    pub replanner: Arc<dyn Replanner>,
    pub reflection: Arc<dyn Reflection>,
    pub knowledge: Arc<dyn KnowledgeSink>,
}

impl Collaborators {
    pub fn new(
        executor: Arc<dyn Executor>,
        replanner: Arc<dyn Replanner>,
        reflection: Arc<dyn Reflection>,
        knowledge: Arc<dyn KnowledgeSink>,
    ) -> Self {
        Self {
            executor,
            replanner,
            reflection,
            knowledge,
        }
    }

    /// Collaborators that record learnings in the project's
    /// `.wayfinder/knowledge.jsonl`.
    pub fn for_project(
        layout: &WorkspaceLayout,
        executor: Arc<dyn Executor>,
        replanner: Arc<dyn Replanner>,
        reflection: Arc<dyn Reflection>,
    ) -> Self {
        Self::new(
            executor,
            replanner,
            reflection,
            Arc::new(JsonlKnowledgeSink::new(&layout.knowledge_log)),
        )
    }

    /// Collaborators for administrative use: nothing can execute, nothing
    /// is learned. Enough to inspect, cancel and force-complete goals.
    pub fn offline() -> Self {
        Self::new(
            Arc::new(CapabilityRegistry::new()),
            Arc::new(NoRecovery),
            Arc::new(NoReflection),
            Arc::new(NullKnowledgeSink),
        )
    }
}
