//! # wf-engine
//!
//! The Wayfinder goal execution engine.
//!
//! [`GoalEngine`] drives each goal's plan step by step through an
//! [`Executor`]. A step that signals replan gets a replacement fragment from
//! the [`Replanner`], spliced in place of the failed step; the breaker from
//! `wf-breaker` guarantees the loop terminates. Recoveries and completions
//! are distilled by a [`Reflection`] collaborator into learning records for
//! a [`KnowledgeSink`].
//!
//! Every external call carries its own timeout from [`EngineConfig`], and
//! only breaker trips, planning failures and unrecoverable step errors end a
//! goal. Everything else is logged, dispatched as an event, and absorbed.

pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod knowledge;
pub mod reflection;
pub mod registry;

pub use collaborators::{
    Collaborators, Executor, KnowledgeSink, NoRecovery, NoReflection, Reflection, Replanner,
};
pub use config::{EngineConfig, WorkspaceLayout};
pub use engine::GoalEngine;
pub use error::{
    ConfigError, EngineError, ExecutorError, KnowledgeError, PlanningError, ReflectionError,
};
pub use knowledge::{JsonlKnowledgeSink, NullKnowledgeSink};
pub use reflection::{ReflectionPolicy, DEFAULT_SENTINEL};
pub use registry::{Capability, CapabilityRegistry};
