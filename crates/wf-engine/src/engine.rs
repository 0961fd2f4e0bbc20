// engine.rs — GoalEngine: drives goals through their plans.
//
// One run per goal at a time; many goals may run concurrently, each on its
// own task. Within a goal, steps run strictly in order:
//
//   1. Pending goals become Active and register their start time with the
//      breaker.
//   2. For each step at the cursor: check the breaker, execute, then
//        - Replan signal → Replanning, ask the replanner, splice the
//          proposal in place of the failed step, reflect, back to Active
//          (the cursor does not move)
//        - error → Failed
//        - success → record history, advance the cursor
//   3. Plan exhausted → Completed, reflect once more.
//
// Goal records are the only shared mutable state. Each lives behind its own
// short-lived lock that is never held across an external call; a run claims
// the goal exclusively for its whole duration.
//
// Reflection, knowledge-sink and persistence failures are absorbed: logged,
// dispatched as events, never allowed to change the goal's outcome.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use wf_breaker::{BreakerDecision, CircuitBreaker, Clock, SystemClock, Trip};
use wf_goal::{
    EventDispatcher, Goal, GoalEvent, GoalState, GoalStore, LearningRecord, LearningTrigger,
    LoadReport, LogSink, NotificationSink, Step,
};

use crate::collaborators::{Collaborators, Executor, KnowledgeSink, Replanner};
use crate::config::{EngineConfig, WorkspaceLayout};
use crate::error::{EngineError, ExecutorError, KnowledgeError, PlanningError, ReflectionError};
use crate::reflection::ReflectionPolicy;

/// Why a run ended. Rendered into the goal's terminal state and reason.
#[derive(Debug)]
enum Termination {
    Completed,
    BreakerTripped(Trip),
    NoRecoveryPlan(Option<String>),
    StepFailed { action: String, detail: String },
    Cancelled(&'static str),
}

impl Termination {
    fn into_state(self) -> GoalState {
        match self {
            Termination::Completed => GoalState::Completed,
            Termination::BreakerTripped(_) | Termination::Cancelled(_) => GoalState::Aborted {
                reason: self.to_string(),
            },
            Termination::NoRecoveryPlan(_) | Termination::StepFailed { .. } => GoalState::Failed {
                reason: self.to_string(),
            },
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Completed => write!(f, "completed"),
            Termination::BreakerTripped(trip) => write!(f, "circuit breaker tripped: {}", trip),
            Termination::NoRecoveryPlan(None) => write!(f, "no recovery plan"),
            Termination::NoRecoveryPlan(Some(detail)) => write!(f, "no recovery plan: {}", detail),
            Termination::StepFailed { action, detail } => {
                write!(f, "step '{}' failed: {}", action, detail)
            }
            Termination::Cancelled(checkpoint) => write!(f, "cancelled {}", checkpoint),
        }
    }
}

/// Where a replan left the run.
enum Flow {
    Continue,
    Stop(Termination),
    /// Someone else finished the goal (administrative override).
    Superseded,
}

/// One goal's record plus its run bookkeeping.
struct GoalSlot {
    goal: Mutex<Goal>,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl GoalSlot {
    fn new(goal: Goal) -> Self {
        Self {
            goal: Mutex::new(goal),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Goal> {
        self.goal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Goal {
        self.lock().clone()
    }
}

/// Exclusive claim on a goal for the duration of a run.
struct RunGuard<'a> {
    slot: &'a GoalSlot,
}

impl<'a> RunGuard<'a> {
    fn claim(slot: &'a GoalSlot) -> Option<Self> {
        slot.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { slot })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.slot.running.store(false, Ordering::Release);
    }
}

/// The goal execution engine.
pub struct GoalEngine {
    config: EngineConfig,
    executor: Arc<dyn Executor>,
    replanner: Arc<dyn Replanner>,
    reflection: ReflectionPolicy,
    knowledge: Arc<dyn KnowledgeSink>,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    store: Option<GoalStore>,
    events: EventDispatcher,
    goals: RwLock<HashMap<Uuid, Arc<GoalSlot>>>,
}

impl GoalEngine {
    /// Create an engine with an in-memory goal table, wall-clock time and a
    /// breaker of its own.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let breaker = Arc::new(CircuitBreaker::with_clock(
            config.breaker_config(),
            clock.clone(),
        ));
        let reflection = ReflectionPolicy::new(
            collaborators.reflection,
            config.reflection_timeout(),
            config.reflection.sentinel.clone(),
        );
        Self {
            config,
            executor: collaborators.executor,
            replanner: collaborators.replanner,
            reflection,
            knowledge: collaborators.knowledge,
            breaker,
            clock,
            store: None,
            events: EventDispatcher::new(),
            goals: RwLock::new(HashMap::new()),
        }
    }

    /// Create an engine persisting to a project's `.wayfinder/` directory:
    /// goal records under `goals/` and events in `events.jsonl`.
    pub fn for_project(
        layout: &WorkspaceLayout,
        config: EngineConfig,
        collaborators: Collaborators,
    ) -> Result<Self, EngineError> {
        let store = GoalStore::new(&layout.goals_dir)?;
        Ok(Self::new(config, collaborators)
            .with_store(store)
            .with_sink(Box::new(LogSink::new(&layout.events_log))))
    }

    /// Persist goal records to `store`.
    pub fn with_store(mut self, store: GoalStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `clock` for timestamps and runtime checks. Replaces the engine's
    /// breaker with a fresh one on the same clock, so call this before
    /// `with_breaker`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.breaker = Arc::new(CircuitBreaker::with_clock(
            self.config.breaker_config(),
            clock.clone(),
        ));
        self.clock = clock;
        self
    }

    /// Add a notification sink for goal events.
    pub fn with_sink(mut self, sink: Box<dyn NotificationSink>) -> Self {
        self.events.add_sink(sink);
        self
    }

    /// Share an existing breaker.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn store(&self) -> Option<&GoalStore> {
        self.store.as_ref()
    }

    /// Accept a new goal. Every action in the plan must be supported by the
    /// executor.
    pub fn submit(&self, description: impl Into<String>, plan: Vec<Step>) -> Result<Uuid, EngineError> {
        if let Some(step) = plan.iter().find(|s| !self.executor.supports(&s.action)) {
            return Err(PlanningError::UnknownAction {
                action: step.action.clone(),
            }
            .into());
        }

        let goal = Goal::new(description, plan);
        let goal_id = goal.id;
        tracing::info!(%goal_id, steps = goal.plan.len(), "goal submitted: {}", goal.description);

        self.persist(&goal);
        self.events.dispatch(&GoalEvent::GoalSubmitted {
            goal_id,
            description: goal.description.clone(),
            steps: goal.plan.len(),
            timestamp: Utc::now(),
        });
        self.write_goals().insert(goal_id, Arc::new(GoalSlot::new(goal)));
        Ok(goal_id)
    }

    /// Register an existing goal record, e.g. one loaded from the store.
    /// Replaces an idle record with the same id.
    pub fn adopt(&self, goal: Goal) -> Result<Uuid, EngineError> {
        let goal_id = goal.id;
        let mut goals = self.write_goals();
        if let Some(existing) = goals.get(&goal_id) {
            if existing.running.load(Ordering::Acquire) {
                return Err(EngineError::GoalBusy(goal_id));
            }
        }
        tracing::debug!(%goal_id, state = %goal.state, "adopted goal");
        goals.insert(goal_id, Arc::new(GoalSlot::new(goal)));
        Ok(goal_id)
    }

    /// Adopt every record in the store. Quarantined records are reported and
    /// dispatched as events; they never fail the load.
    pub fn load_from_store(&self) -> Result<LoadReport, EngineError> {
        let Some(store) = &self.store else {
            return Ok(LoadReport::default());
        };
        let report = store.load_all()?;

        for record in &report.quarantined {
            self.events.dispatch(&GoalEvent::RecordQuarantined {
                file_name: record.file_name.clone(),
                error: record.error.clone(),
                timestamp: Utc::now(),
            });
        }
        for goal in &report.goals {
            if let Err(e) = self.adopt(goal.clone()) {
                tracing::warn!(goal_id = %goal.id, "skipping stored goal: {}", e);
            }
        }
        tracing::info!(
            loaded = report.goals.len(),
            repaired = report.repaired.len(),
            quarantined = report.quarantined.len(),
            "goal store loaded"
        );
        Ok(report)
    }

    /// Run a goal until it reaches a terminal state.
    ///
    /// Terminal and exempt goals are returned as-is without executing
    /// anything. A second concurrent run of the same goal is rejected with
    /// `GoalBusy`.
    pub async fn run_goal(&self, goal_id: Uuid) -> Result<Goal, EngineError> {
        let slot = self.slot(goal_id)?;
        let _guard = RunGuard::claim(&slot).ok_or(EngineError::GoalBusy(goal_id))?;

        {
            let goal = slot.lock();
            if goal.state.is_terminal() || goal.is_exempt() {
                tracing::debug!(%goal_id, state = %goal.state, "nothing to run");
                return Ok(goal.clone());
            }
        }

        self.activate(&slot)?;

        let Some(termination) = self.drive(&slot).await else {
            // Finished elsewhere while running; drop any tally this run
            // created after the override reset the breaker.
            self.breaker.reset(goal_id);
            return Ok(slot.snapshot());
        };
        let completed = matches!(termination, Termination::Completed);
        let goal = self.terminate(&slot, termination)?;

        if completed {
            let narrative = self
                .absorb_reflection(
                    goal_id,
                    LearningTrigger::SuccessfulCompletion,
                    self.reflection.on_success(&goal.description, &goal.history).await,
                );
            if let Some(narrative) = narrative {
                self.capture(goal_id, LearningTrigger::SuccessfulCompletion, narrative)
                    .await;
            }
        }
        Ok(goal)
    }

    /// Run a goal on its own tokio task.
    pub fn spawn(self: &Arc<Self>, goal_id: Uuid) -> JoinHandle<Result<Goal, EngineError>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run_goal(goal_id).await })
    }

    /// Request that a goal be aborted.
    ///
    /// A running goal stops at its next checkpoint: the top of the step
    /// loop, before an external call, or right after a replan splice. An
    /// in-flight call is never interrupted. An idle goal is aborted now.
    pub fn cancel(&self, goal_id: Uuid) -> Result<(), EngineError> {
        let slot = self.slot(goal_id)?;
        slot.cancel.cancel();
        tracing::info!(%goal_id, "cancellation requested");

        if let Some(_guard) = RunGuard::claim(&slot) {
            let idle_and_open = !slot.lock().state.is_terminal();
            if idle_and_open {
                self.terminate(&slot, Termination::Cancelled("before running"))?;
            }
        }
        Ok(())
    }

    /// Administrative override: mark a goal completed whatever its state.
    ///
    /// Clears the plan, records `reason` as the completion note and marks the
    /// goal exempt from further automatic execution. Repeating the call with
    /// the same reason changes nothing and writes nothing.
    pub fn force_complete(&self, goal_id: Uuid, reason: &str) -> Result<Goal, EngineError> {
        let slot = self.slot(goal_id)?;
        let now = self.clock.now();

        let (goal, previous) = {
            let mut goal = slot.lock();
            let previous = goal.state.clone();
            if !goal.force_complete(reason, now) {
                tracing::debug!(%goal_id, "goal already force-completed with this note");
                return Ok(goal.clone());
            }
            (goal.clone(), previous)
        };

        // A running loop sees the terminal state at its next checkpoint.
        slot.cancel.cancel();
        if !previous.is_terminal() {
            self.breaker.reset(goal_id);
        }

        tracing::info!(%goal_id, from = %previous, "goal force-completed: {}", reason);
        self.persist(&goal);
        self.events
            .dispatch(&GoalEvent::state_changed(goal_id, &previous, &goal.state));
        self.events.dispatch(&GoalEvent::GoalForceCompleted {
            goal_id,
            note: reason.to_string(),
            timestamp: now,
        });
        Ok(goal)
    }

    /// Read-only view of a goal.
    pub fn inspect(&self, goal_id: Uuid) -> Result<Goal, EngineError> {
        if let Some(slot) = self.read_goals().get(&goal_id) {
            return Ok(slot.snapshot());
        }
        match &self.store {
            Some(store) => store.get(goal_id)?.ok_or(EngineError::NotFound(goal_id)),
            None => Err(EngineError::NotFound(goal_id)),
        }
    }

    /// Every goal the engine knows about, newest first.
    pub fn list(&self) -> Vec<Goal> {
        let mut goals: Vec<Goal> = self
            .read_goals()
            .values()
            .map(|slot| slot.snapshot())
            .collect();
        goals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        goals
    }

    // ── Run internals ───────────────────────────────────────────

    /// Move a pending or interrupted goal into Active and register its start
    /// time with the breaker.
    fn activate(&self, slot: &GoalSlot) -> Result<(), EngineError> {
        let now = self.clock.now();
        let (goal, previous) = {
            let mut goal = slot.lock();
            let previous = goal.state.clone();
            if previous != GoalState::Active {
                // Pending, or Replanning left behind by an interrupted run.
                goal.transition_at(GoalState::Active, now)?;
            }
            let started = goal.start_time.unwrap_or(now);
            self.breaker.mark_started(goal.id, started);
            (goal.clone(), previous)
        };

        if previous != GoalState::Active {
            tracing::info!(goal_id = %goal.id, from = %previous, "goal active");
            self.persist(&goal);
            self.events
                .dispatch(&GoalEvent::state_changed(goal.id, &previous, &goal.state));
        }
        Ok(())
    }

    /// The step loop. Returns `None` when the goal was finished by someone
    /// else while it ran.
    async fn drive(&self, slot: &GoalSlot) -> Option<Termination> {
        loop {
            if slot.cancel.is_cancelled() {
                return self.cancelled_unless_superseded(slot, "at step boundary");
            }

            let (goal_id, index, step) = {
                let goal = slot.lock();
                if goal.state.is_terminal() {
                    return None;
                }
                match goal.current_step() {
                    Some(step) => (goal.id, goal.current_step_index, step.clone()),
                    None => return Some(Termination::Completed),
                }
            };

            let decision = self.breaker.check(goal_id, &step.action);
            {
                // An override may have finished the goal while the lock was
                // released; its counters are gone for good.
                let mut goal = slot.lock();
                if goal.state.is_terminal() {
                    return None;
                }
                goal.execution_counters = self.breaker.counters(goal_id);
            }
            if let BreakerDecision::Trip(trip) = decision {
                self.events.dispatch(&GoalEvent::BreakerTripped {
                    goal_id,
                    action: trip.action.clone(),
                    cause: trip.cause.to_string(),
                    timestamp: Utc::now(),
                });
                return Some(Termination::BreakerTripped(trip));
            }

            if slot.cancel.is_cancelled() {
                return self.cancelled_unless_superseded(slot, "before executing step");
            }

            tracing::debug!(%goal_id, index, action = %step.action, "executing step");
            let timeout = self.config.executor_timeout();
            let result = match tokio::time::timeout(timeout, self.executor.execute(&step)).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    return Some(Termination::StepFailed {
                        action: step.action,
                        detail: e.to_string(),
                    })
                }
                Err(_) => {
                    return Some(Termination::StepFailed {
                        action: step.action,
                        detail: ExecutorError::Timeout(timeout).to_string(),
                    })
                }
            };

            if slot.lock().state.is_terminal() {
                return None;
            }

            if result.needs_replan() {
                tracing::info!(%goal_id, index, action = %step.action, "step requested replan: {}", result.summary());
                match self.replan(slot, &step).await {
                    Flow::Continue => continue,
                    Flow::Stop(termination) => return Some(termination),
                    Flow::Superseded => return None,
                }
            }

            if !result.is_success() {
                return Some(Termination::StepFailed {
                    action: step.action,
                    detail: result.summary(),
                });
            }

            let goal = {
                let mut goal = slot.lock();
                goal.record_success(result.output, self.clock.now());
                goal.clone()
            };
            self.persist(&goal);
            self.events.dispatch(&GoalEvent::StepCompleted {
                goal_id,
                index,
                action: step.action,
                timestamp: Utc::now(),
            });
        }
    }

    /// Obtain a replacement for `failed` and splice it in at the cursor.
    async fn replan(&self, slot: &GoalSlot, failed: &Step) -> Flow {
        let (goal_id, description, history) = {
            let mut goal = slot.lock();
            if let Err(e) = goal.transition_at(GoalState::Replanning, self.clock.now()) {
                return Flow::Stop(Termination::NoRecoveryPlan(Some(e.to_string())));
            }
            (goal.id, goal.description.clone(), goal.history.clone())
        };
        self.state_changed(slot, &GoalState::Active);

        if slot.cancel.is_cancelled() {
            return match self.cancelled_unless_superseded(slot, "before replanning") {
                Some(termination) => Flow::Stop(termination),
                None => Flow::Superseded,
            };
        }

        let timeout = self.config.replanner_timeout();
        let call = self.replanner.propose_plan(&description, failed, &history);
        let proposal = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(proposal)) => proposal,
            Ok(Err(e)) => {
                tracing::warn!(%goal_id, action = %failed.action, "replanner error: {}", e);
                return Flow::Stop(Termination::NoRecoveryPlan(Some(e.to_string())));
            }
            Err(_) => {
                let e = PlanningError::Timeout(timeout);
                tracing::warn!(%goal_id, action = %failed.action, "{}", e);
                return Flow::Stop(Termination::NoRecoveryPlan(Some(e.to_string())));
            }
        };

        if proposal.is_empty() {
            tracing::info!(%goal_id, action = %failed.action, "replanner returned no steps");
            return Flow::Stop(Termination::NoRecoveryPlan(None));
        }
        if let Some(step) = proposal.iter().find(|s| !self.executor.supports(&s.action)) {
            let e = PlanningError::UnknownAction {
                action: step.action.clone(),
            };
            tracing::warn!(%goal_id, "rejected replacement plan: {}", e);
            return Flow::Stop(Termination::NoRecoveryPlan(Some(e.to_string())));
        }

        let (goal, index) = {
            let mut goal = slot.lock();
            if goal.state.is_terminal() {
                return Flow::Superseded;
            }
            if let Err(e) = goal.splice_current(proposal.clone()) {
                return Flow::Stop(Termination::NoRecoveryPlan(Some(e.to_string())));
            }
            goal.failures += 1;
            goal.updated_at = self.clock.now();
            let index = goal.current_step_index;
            (goal.clone(), index)
        };
        tracing::info!(%goal_id, index, replaced = %failed.action, inserted = proposal.len(), "plan spliced");
        self.persist(&goal);
        self.events.dispatch(&GoalEvent::PlanSpliced {
            goal_id,
            index,
            replaced_action: failed.action.clone(),
            inserted: proposal.iter().map(|s| s.action.clone()).collect(),
            timestamp: Utc::now(),
        });

        if slot.cancel.is_cancelled() {
            return match self.cancelled_unless_superseded(slot, "after replan") {
                Some(termination) => Flow::Stop(termination),
                None => Flow::Superseded,
            };
        }

        let narrative = self.absorb_reflection(
            goal_id,
            LearningTrigger::ReplanRecovery,
            self.reflection.on_replan(failed, &proposal, &history).await,
        );
        if let Some(narrative) = narrative {
            self.capture(goal_id, LearningTrigger::ReplanRecovery, narrative)
                .await;
        }

        {
            let mut goal = slot.lock();
            if goal.state.is_terminal() {
                return Flow::Superseded;
            }
            if let Err(e) = goal.transition_at(GoalState::Active, self.clock.now()) {
                return Flow::Stop(Termination::NoRecoveryPlan(Some(e.to_string())));
            }
        }
        self.state_changed(slot, &GoalState::Replanning);
        Flow::Continue
    }

    /// Apply a termination: transition, reset the breaker, persist, notify.
    fn terminate(&self, slot: &GoalSlot, termination: Termination) -> Result<Goal, EngineError> {
        let now = self.clock.now();
        let (goal, previous) = {
            let mut goal = slot.lock();
            if goal.state.is_terminal() {
                let done = goal.clone();
                drop(goal);
                self.breaker.reset(done.id);
                return Ok(done);
            }
            let previous = goal.state.clone();
            goal.transition_at(termination.into_state(), now)?;
            (goal.clone(), previous)
        };

        self.breaker.reset(goal.id);
        match goal.state.reason() {
            Some(reason) => {
                tracing::info!(goal_id = %goal.id, state = %goal.state, "goal finished: {}", reason)
            }
            None => tracing::info!(goal_id = %goal.id, state = %goal.state, "goal finished"),
        }
        self.persist(&goal);
        self.events
            .dispatch(&GoalEvent::state_changed(goal.id, &previous, &goal.state));
        Ok(goal)
    }

    fn cancelled_unless_superseded(
        &self,
        slot: &GoalSlot,
        checkpoint: &'static str,
    ) -> Option<Termination> {
        if slot.lock().state.is_terminal() {
            None
        } else {
            Some(Termination::Cancelled(checkpoint))
        }
    }

    /// Persist and announce a non-terminal state change made under the lock.
    fn state_changed(&self, slot: &GoalSlot, previous: &GoalState) {
        let goal = slot.snapshot();
        tracing::debug!(goal_id = %goal.id, from = %previous, to = %goal.state, "goal state changed");
        self.persist(&goal);
        self.events
            .dispatch(&GoalEvent::state_changed(goal.id, previous, &goal.state));
    }

    // ── Absorbed failures ───────────────────────────────────────

    fn absorb_reflection(
        &self,
        goal_id: Uuid,
        trigger: LearningTrigger,
        result: Result<Option<String>, ReflectionError>,
    ) -> Option<String> {
        match result {
            Ok(narrative) => narrative,
            Err(e) => {
                tracing::warn!(%goal_id, %trigger, "reflection failed: {}", e);
                self.events.dispatch(&GoalEvent::ReflectionFailed {
                    goal_id,
                    trigger,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                None
            }
        }
    }

    /// Hand a narrative to the knowledge sink. Failures are logged and
    /// dispatched, never propagated.
    async fn capture(&self, goal_id: Uuid, trigger: LearningTrigger, narrative: String) {
        let record = LearningRecord::new(goal_id, trigger, narrative, self.clock.now());
        let timeout = self.config.knowledge_timeout();

        let error = match tokio::time::timeout(timeout, self.knowledge.add_knowledge(&record)).await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(KnowledgeError::Timeout(timeout).to_string()),
        };

        match error {
            None => {
                tracing::info!(%goal_id, %trigger, "learning captured");
                self.events.dispatch(&GoalEvent::LearningCaptured {
                    goal_id,
                    trigger,
                    timestamp: Utc::now(),
                });
            }
            Some(error) => {
                tracing::warn!(%goal_id, %trigger, "knowledge write failed: {}", error);
                self.events.dispatch(&GoalEvent::KnowledgeWriteFailed {
                    goal_id,
                    trigger,
                    error,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    fn persist(&self, goal: &Goal) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(goal) {
            tracing::warn!(goal_id = %goal.id, "failed to persist goal: {}", e);
            self.events.dispatch(&GoalEvent::StoreWriteFailed {
                goal_id: goal.id,
                error: e.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    // ── Goal table ──────────────────────────────────────────────

    fn slot(&self, goal_id: Uuid) -> Result<Arc<GoalSlot>, EngineError> {
        self.read_goals()
            .get(&goal_id)
            .cloned()
            .ok_or(EngineError::NotFound(goal_id))
    }

    fn read_goals(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Arc<GoalSlot>>> {
        self.goals.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_goals(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Arc<GoalSlot>>> {
        self.goals.write().unwrap_or_else(PoisonError::into_inner)
    }
}
