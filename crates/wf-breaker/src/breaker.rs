// breaker.rs — Per-goal circuit breaker bounding step repeats and runtime.
//
// Every step attempt goes through `check` before it executes. The breaker
// counts attempts per (goal, action) and measures wall-clock time since the
// goal started. Either limit trips the goal, and a trip is latched until the
// engine calls `reset` on the goal's terminal transition.
//
// State is sharded: the outer map only hands out per-goal shards, and each
// shard has its own lock, so goals running concurrently never wait on one
// another's counters.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};

/// Default number of attempts allowed per (goal, action) pair.
pub const DEFAULT_MAX_STEP_REPEATS: u32 = 3;

/// Default wall-clock ceiling for one goal.
pub const DEFAULT_MAX_GOAL_RUNTIME: Duration = Duration::from_secs(300);

/// Breaker limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Attempts allowed per (goal, action). The attempt after the last
    /// allowed one trips.
    pub max_step_repeats: u32,
    /// Elapsed time since the goal started that trips the next check.
    pub max_goal_runtime: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_step_repeats: DEFAULT_MAX_STEP_REPEATS,
            max_goal_runtime: DEFAULT_MAX_GOAL_RUNTIME,
        }
    }
}

/// Which limit tripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TripCause {
    RepeatLimit { count: u32, limit: u32 },
    RuntimeExceeded { elapsed: Duration, limit: Duration },
}

impl fmt::Display for TripCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripCause::RepeatLimit { count, limit } => {
                write!(f, "repeat count {} exceeds limit of {}", count, limit)
            }
            TripCause::RuntimeExceeded { elapsed, limit } => write!(
                f,
                "elapsed runtime {}s exceeds limit of {}s",
                elapsed.as_secs(),
                limit.as_secs()
            ),
        }
    }
}

/// A tripped breaker for one goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trip {
    pub goal_id: Uuid,
    /// The step action whose check tripped.
    pub action: String,
    pub cause: TripCause,
}

impl fmt::Display for Trip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at step '{}'", self.cause, self.action)
    }
}

/// Outcome of a breaker check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerDecision {
    Proceed,
    Trip(Trip),
}

impl BreakerDecision {
    pub fn is_trip(&self) -> bool {
        matches!(self, BreakerDecision::Trip(_))
    }
}

#[derive(Debug, Default)]
struct GoalTally {
    counters: BTreeMap<String, u32>,
    started_at: Option<DateTime<Utc>>,
    tripped: Option<Trip>,
}

type Shard = Arc<Mutex<GoalTally>>;

/// Loop protection for many goals at once.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    shards: RwLock<HashMap<Uuid, Shard>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Create a breaker reading wall-clock time.
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            shards: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Record when a goal started. The first recorded time wins.
    pub fn mark_started(&self, goal_id: Uuid, at: DateTime<Utc>) {
        let shard = self.shard(goal_id);
        let mut tally = lock(&shard);
        tally.started_at.get_or_insert(at);
    }

    /// Count one attempt of `action` for `goal_id` and decide whether it may run.
    ///
    /// The repeat limit is evaluated before the runtime ceiling, so when both
    /// hold the repeat count is reported. A goal without a recorded start
    /// time starts now. Once tripped, every later check for the goal reports
    /// the same trip until `reset`.
    pub fn check(&self, goal_id: Uuid, action: &str) -> BreakerDecision {
        let shard = self.shard(goal_id);
        let mut tally = lock(&shard);
        let now = self.clock.now();

        let started_at = *tally.started_at.get_or_insert(now);
        let count = {
            let entry = tally.counters.entry(action.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };

        if let Some(trip) = &tally.tripped {
            tracing::debug!(%goal_id, action, "breaker already tripped");
            return BreakerDecision::Trip(trip.clone());
        }

        let cause = if count > self.config.max_step_repeats {
            Some(TripCause::RepeatLimit {
                count,
                limit: self.config.max_step_repeats,
            })
        } else {
            let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);
            (elapsed > self.config.max_goal_runtime).then_some(TripCause::RuntimeExceeded {
                elapsed,
                limit: self.config.max_goal_runtime,
            })
        };

        match cause {
            Some(cause) => {
                let trip = Trip {
                    goal_id,
                    action: action.to_string(),
                    cause,
                };
                tracing::warn!(%goal_id, action, cause = %trip.cause, "circuit breaker tripped");
                tally.tripped = Some(trip.clone());
                BreakerDecision::Trip(trip)
            }
            None => {
                tracing::debug!(%goal_id, action, count, "breaker check passed");
                BreakerDecision::Proceed
            }
        }
    }

    /// `check` reduced to a yes/no answer.
    pub fn should_break(&self, goal_id: Uuid, action: &str) -> bool {
        self.check(goal_id, action).is_trip()
    }

    /// Snapshot of the attempt counts for a goal. Empty for unknown goals.
    pub fn counters(&self, goal_id: Uuid) -> BTreeMap<String, u32> {
        self.existing_shard(goal_id)
            .map(|shard| lock(&shard).counters.clone())
            .unwrap_or_default()
    }

    pub fn started_at(&self, goal_id: Uuid) -> Option<DateTime<Utc>> {
        self.existing_shard(goal_id)
            .and_then(|shard| lock(&shard).started_at)
    }

    /// The latched trip for a goal, if any.
    pub fn trip(&self, goal_id: Uuid) -> Option<Trip> {
        self.existing_shard(goal_id)
            .and_then(|shard| lock(&shard).tripped.clone())
    }

    /// Forget all counters, the start time and any trip for a goal.
    ///
    /// Returns `false` when nothing was tracked for the goal.
    pub fn reset(&self, goal_id: Uuid) -> bool {
        let removed = self
            .shards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&goal_id)
            .is_some();
        if removed {
            tracing::debug!(%goal_id, "breaker reset");
        }
        removed
    }

    /// Number of goals currently tracked.
    pub fn tracked_goals(&self) -> usize {
        self.shards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn existing_shard(&self, goal_id: Uuid) -> Option<Shard> {
        self.shards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&goal_id)
            .cloned()
    }

    fn shard(&self, goal_id: Uuid) -> Shard {
        if let Some(shard) = self.existing_shard(goal_id) {
            return shard;
        }
        self.shards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(goal_id)
            .or_default()
            .clone()
    }
}

fn lock(shard: &Shard) -> MutexGuard<'_, GoalTally> {
    shard.lock().unwrap_or_else(PoisonError::into_inner)
}
