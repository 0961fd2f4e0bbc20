//! # wf-goal
//!
//! Goal lifecycle, plan model, and persistence for Wayfinder.
//!
//! A [`Goal`] is a free-text objective decomposed into an ordered plan of
//! [`Step`]s. The state machine enforces a valid lifecycle from submission
//! through execution, replanning, and one of three terminal outcomes.
//!
//! ## Key components
//!
//! - [`Goal`] / [`GoalState`] — the lifecycle state machine (Pending → Active
//!   ⇄ Replanning → Completed | Failed | Aborted) and plan splicing
//! - [`Step`], [`ExecutionResult`], [`Signal`] — plan steps and the explicit
//!   result signal that drives replanning
//! - [`LearningRecord`] — distilled knowledge captured from a run
//! - [`GoalStore`] — JSON file-based persistence with repair and quarantine
//! - [`GoalEvent`] / [`EventDispatcher`] / [`NotificationSink`] — lifecycle
//!   and absorbed-failure notifications

pub mod error;
pub mod events;
pub mod goal;
pub mod learning;
pub mod step;
pub mod store;

pub use error::GoalError;
pub use events::{EventDispatcher, GoalEvent, LogSink, NotificationSink};
pub use goal::{Goal, GoalState, EXEMPT_EXECUTION_COUNT};
pub use learning::{LearningRecord, LearningTrigger};
pub use step::{ExecutionResult, Risk, Signal, Step, StepRecord, StepStatus};
pub use store::{GoalStore, LoadReport, QuarantinedRecord};
