// registry.rs — Capability registry: action name → typed executable capability.
//
// Plans name actions; the registry resolves them to capabilities. An action
// with no registered capability is a planning error, caught when a plan is
// submitted or a replacement fragment arrives, never at execution time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use wf_goal::{ExecutionResult, Step};

use crate::collaborators::Executor;
use crate::error::{ExecutorError, PlanningError};

/// Something a step can invoke by name.
#[async_trait]
pub trait Capability: Send + Sync {
    /// The action name plans use to refer to this capability.
    fn name(&self) -> &str;

    async fn invoke(&self, parameters: &Map<String, Value>)
        -> Result<ExecutionResult, ExecutorError>;
}

/// Registry of capabilities, usable directly as an `Executor`.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under its name. A capability already registered
    /// under that name is replaced and returned.
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Option<Arc<dyn Capability>> {
        let name = capability.name().to_string();
        let previous = self.capabilities.insert(name.clone(), capability);
        if previous.is_some() {
            tracing::info!("Replaced capability: {}", name);
        } else {
            tracing::debug!("Registered capability: {}", name);
        }
        previous
    }

    pub fn get(&self, action: &str) -> Option<&Arc<dyn Capability>> {
        self.capabilities.get(action)
    }

    pub fn contains(&self, action: &str) -> bool {
        self.capabilities.contains_key(action)
    }

    /// Registered action names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Check that every step in a plan names a registered capability.
    pub fn resolve_plan(&self, plan: &[Step]) -> Result<(), PlanningError> {
        match plan.iter().find(|step| !self.contains(&step.action)) {
            Some(step) => Err(PlanningError::UnknownAction {
                action: step.action.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Executor for CapabilityRegistry {
    async fn execute(&self, step: &Step) -> Result<ExecutionResult, ExecutorError> {
        let capability = self
            .get(&step.action)
            .ok_or_else(|| ExecutorError::UnknownAction(step.action.clone()))?;
        tracing::debug!(action = %step.action, persona = %step.assigned_persona, "invoking capability");
        capability.invoke(&step.parameters).await
    }

    fn supports(&self, action: &str) -> bool {
        self.contains(action)
    }
}
