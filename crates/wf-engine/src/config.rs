// config.rs — Engine configuration and the project directory layout.
//
// Reads `.wayfinder/wayfinder.toml`. Every field has a default, so an empty
// or missing file yields a working configuration:
//
//   [breaker]
//   max_step_repeats = 3
//   max_goal_runtime_secs = 300
//
//   [timeouts]
//   executor_secs = 120
//   replanner_secs = 60
//   reflection_secs = 30
//   knowledge_secs = 10
//
//   [reflection]
//   sentinel = "No generalization possible."

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use wf_breaker::BreakerConfig;

use crate::error::ConfigError;
use crate::reflection::DEFAULT_SENTINEL;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub breaker: BreakerSection,

    #[serde(default)]
    pub timeouts: TimeoutSection,

    #[serde(default)]
    pub reflection: ReflectionSection,
}

/// Loop protection limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSection {
    /// Attempts allowed per (goal, action) before the breaker trips.
    #[serde(default = "default_max_step_repeats")]
    pub max_step_repeats: u32,

    /// Wall-clock ceiling for a goal, in seconds.
    #[serde(default = "default_max_goal_runtime_secs")]
    pub max_goal_runtime_secs: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            max_step_repeats: default_max_step_repeats(),
            max_goal_runtime_secs: default_max_goal_runtime_secs(),
        }
    }
}

/// Per-call timeouts for external collaborators, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutSection {
    #[serde(default = "default_executor_secs")]
    pub executor_secs: u64,

    #[serde(default = "default_replanner_secs")]
    pub replanner_secs: u64,

    #[serde(default = "default_reflection_secs")]
    pub reflection_secs: u64,

    #[serde(default = "default_knowledge_secs")]
    pub knowledge_secs: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            executor_secs: default_executor_secs(),
            replanner_secs: default_replanner_secs(),
            reflection_secs: default_reflection_secs(),
            knowledge_secs: default_knowledge_secs(),
        }
    }
}

/// Reflection policy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionSection {
    /// A narrative containing this text is discarded.
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
}

impl Default for ReflectionSection {
    fn default() -> Self {
        Self {
            sentinel: default_sentinel(),
        }
    }
}

// Serde default functions
fn default_max_step_repeats() -> u32 {
    wf_breaker::DEFAULT_MAX_STEP_REPEATS
}

fn default_max_goal_runtime_secs() -> u64 {
    wf_breaker::DEFAULT_MAX_GOAL_RUNTIME.as_secs()
}

fn default_executor_secs() -> u64 {
    120
}

fn default_replanner_secs() -> u64 {
    60
}

fn default_reflection_secs() -> u64 {
    30
}

fn default_knowledge_secs() -> u64 {
    10
}

fn default_sentinel() -> String {
    DEFAULT_SENTINEL.to_string()
}

impl EngineConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load the config if the file exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parse and validate TOML.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits the engine cannot honour.
    ///
    /// Every external-call timeout must be non-zero and strictly shorter
    /// than the goal runtime ceiling.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.max_step_repeats == 0 {
            return Err(ConfigError::Invalid(
                "breaker.max_step_repeats must be at least 1".to_string(),
            ));
        }
        if self.breaker.max_goal_runtime_secs == 0 {
            return Err(ConfigError::Invalid(
                "breaker.max_goal_runtime_secs must be at least 1".to_string(),
            ));
        }

        let ceiling = self.breaker.max_goal_runtime_secs;
        let timeouts = [
            ("executor_secs", self.timeouts.executor_secs),
            ("replanner_secs", self.timeouts.replanner_secs),
            ("reflection_secs", self.timeouts.reflection_secs),
            ("knowledge_secs", self.timeouts.knowledge_secs),
        ];
        for (name, secs) in timeouts {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.{} must be at least 1",
                    name
                )));
            }
            if secs >= ceiling {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.{} ({}s) must be shorter than breaker.max_goal_runtime_secs ({}s)",
                    name, secs, ceiling
                )));
            }
        }
        Ok(())
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            max_step_repeats: self.breaker.max_step_repeats,
            max_goal_runtime: Duration::from_secs(self.breaker.max_goal_runtime_secs),
        }
    }

    pub fn executor_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.executor_secs)
    }

    pub fn replanner_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.replanner_secs)
    }

    pub fn reflection_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.reflection_secs)
    }

    pub fn knowledge_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.knowledge_secs)
    }
}

/// Standard paths inside a project using Wayfinder.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceLayout {
    pub project_root: PathBuf,
    pub wayfinder_dir: PathBuf,
    pub goals_dir: PathBuf,
    pub knowledge_log: PathBuf,
    pub events_log: PathBuf,
    pub config_file: PathBuf,
}

impl WorkspaceLayout {
    /// Create a layout with standard `.wayfinder/` paths under `project_root`.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        let root = project_root.as_ref().to_path_buf();
        let wf_dir = root.join(".wayfinder");
        Self {
            project_root: root,
            goals_dir: wf_dir.join("goals"),
            knowledge_log: wf_dir.join("knowledge.jsonl"),
            events_log: wf_dir.join("events.jsonl"),
            config_file: wf_dir.join("wayfinder.toml"),
            wayfinder_dir: wf_dir,
        }
    }
}
