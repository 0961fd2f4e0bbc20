//! # wf-breaker
//!
//! Loop protection for Wayfinder goals.
//!
//! A [`CircuitBreaker`] is owned by (or injected into) an engine instance,
//! never process-wide. It bounds two things per goal: how many times a step
//! action may be attempted and how long the goal may run. Time comes from a
//! [`Clock`] so tests can drive it synthetically with [`ManualClock`].

pub mod breaker;
pub mod clock;

pub use breaker::{
    BreakerConfig, BreakerDecision, CircuitBreaker, Trip, TripCause, DEFAULT_MAX_GOAL_RUNTIME,
    DEFAULT_MAX_STEP_REPEATS,
};
pub use clock::{Clock, ManualClock, SystemClock};
