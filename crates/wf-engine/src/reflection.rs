// reflection.rs — Local policy around the reflection collaborator.
//
// Every reflection call gets its own timeout. A narrative that is blank or
// contains the "no generalization possible" sentinel is treated as no
// narrative, so it never reaches the knowledge sink.

use std::sync::Arc;
use std::time::Duration;

use wf_goal::{Step, StepRecord};

use crate::collaborators::Reflection;
use crate::error::ReflectionError;

/// Narrative a reflection capability returns when there is nothing to learn.
pub const DEFAULT_SENTINEL: &str = "No generalization possible.";

/// Timeout and sentinel filtering for a `Reflection` collaborator.
#[derive(Clone)]
pub struct ReflectionPolicy {
    reflection: Arc<dyn Reflection>,
    timeout: Duration,
    sentinel: String,
}

impl ReflectionPolicy {
    pub fn new(reflection: Arc<dyn Reflection>, timeout: Duration, sentinel: impl Into<String>) -> Self {
        Self {
            reflection,
            timeout,
            sentinel: sentinel.into(),
        }
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    /// Reflect on a replan that produced `new_steps` in place of `original`.
    pub async fn on_replan(
        &self,
        original: &Step,
        new_steps: &[Step],
        history: &[StepRecord],
    ) -> Result<Option<String>, ReflectionError> {
        let call = self.reflection.on_replan(original, new_steps, history);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map(|narrative| self.filter(narrative)),
            Err(_) => Err(ReflectionError::Timeout(self.timeout)),
        }
    }

    /// Reflect on a goal that ran to completion.
    pub async fn on_success(
        &self,
        goal_description: &str,
        history: &[StepRecord],
    ) -> Result<Option<String>, ReflectionError> {
        let call = self.reflection.on_success(goal_description, history);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map(|narrative| self.filter(narrative)),
            Err(_) => Err(ReflectionError::Timeout(self.timeout)),
        }
    }

    /// Drop blank narratives and anything carrying the sentinel.
    pub fn filter(&self, narrative: Option<String>) -> Option<String> {
        let narrative = narrative?;
        let trimmed = narrative.trim();
        if trimmed.is_empty() || (!self.sentinel.is_empty() && trimmed.contains(&self.sentinel)) {
            tracing::debug!("reflection produced no generalization");
            return None;
        }
        Some(trimmed.to_string())
    }
}
