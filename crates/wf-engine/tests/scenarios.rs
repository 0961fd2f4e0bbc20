// scenarios.rs — End-to-end behaviour of the goal engine.
//
// Each test wires the engine to scripted collaborators and checks one
// observable property:
//
//   - a step that keeps asking for a replan trips the breaker on attempt 4
//   - a clean plan completes and captures exactly one learning record
//   - a goal already past its runtime ceiling aborts before any step runs
//   - a replan replaces the failed step and resumes at the same index
//   - the cursor never moves backwards
//   - empty replans, sentinel narratives, absorbed failures, overrides,
//     cancellation, per-goal exclusion and cross-goal isolation
//   - an override or a cancellation that lands mid-run

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Map, Value};
use tempfile::tempdir;
use tokio::sync::Notify;

use wf_breaker::{CircuitBreaker, Clock, ManualClock};
use wf_engine::{
    Capability, CapabilityRegistry, Collaborators, EngineConfig, EngineError, Executor,
    ExecutorError, GoalEngine, JsonlKnowledgeSink, KnowledgeError, KnowledgeSink, NoReflection,
    PlanningError, Reflection, ReflectionError, Replanner, WorkspaceLayout,
};
use wf_goal::{
    ExecutionResult, Goal, GoalError, GoalEvent, GoalState, GoalStore, LearningRecord,
    LearningTrigger, NotificationSink, Step, StepRecord,
};

// =========================================================
// Scripted collaborators
// =========================================================

type Respond = dyn Fn(&Step, usize) -> Result<ExecutionResult, ExecutorError> + Send + Sync;

/// Answers each step through a closure given the step and how many times
/// its action has been attempted (1-based). Records every call in order.
struct ScriptedExecutor {
    respond: Box<Respond>,
    attempts: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn new(
        respond: impl Fn(&Step, usize) -> Result<ExecutionResult, ExecutorError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            attempts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn succeeding() -> Arc<Self> {
        Self::new(|step, _| Ok(ExecutionResult::success(json!({ "done": step.action }))))
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, step: &Step) -> Result<ExecutionResult, ExecutorError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(step.action.clone()).or_insert(0);
            *n += 1;
            *n
        };
        self.calls.lock().unwrap().push(step.action.clone());
        tokio::task::yield_now().await;
        (self.respond)(step, attempt)
    }
}

/// Blocks inside `execute` until released, to hold a step in flight.
struct GatedExecutor {
    started: Notify,
    release: Notify,
    calls: AtomicUsize,
}

impl GatedExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Executor for GatedExecutor {
    async fn execute(&self, _step: &Step) -> Result<ExecutionResult, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        Ok(ExecutionResult::success(Value::Null))
    }
}

struct FixedReplanner {
    proposal: Result<Vec<Step>, String>,
    calls: AtomicUsize,
}

impl FixedReplanner {
    fn proposing(proposal: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            proposal: Ok(proposal),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            proposal: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Replanner for FixedReplanner {
    async fn propose_plan(
        &self,
        _goal_description: &str,
        _failed_step: &Step,
        _history: &[StepRecord],
    ) -> Result<Vec<Step>, PlanningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.proposal.clone().map_err(PlanningError::Failed)
    }
}

struct ScriptedReflection {
    on_replan: Result<Option<String>, String>,
    on_success: Result<Option<String>, String>,
    replan_calls: AtomicUsize,
    success_calls: AtomicUsize,
}

impl ScriptedReflection {
    fn new(on_replan: Option<&str>, on_success: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            on_replan: Ok(on_replan.map(str::to_string)),
            on_success: Ok(on_success.map(str::to_string)),
            replan_calls: AtomicUsize::new(0),
            success_calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            on_replan: Err("model unavailable".to_string()),
            on_success: Err("model unavailable".to_string()),
            replan_calls: AtomicUsize::new(0),
            success_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Reflection for ScriptedReflection {
    async fn on_replan(
        &self,
        _original: &Step,
        _new_steps: &[Step],
        _history: &[StepRecord],
    ) -> Result<Option<String>, ReflectionError> {
        self.replan_calls.fetch_add(1, Ordering::SeqCst);
        self.on_replan.clone().map_err(ReflectionError::Failed)
    }

    async fn on_success(
        &self,
        _goal_description: &str,
        _history: &[StepRecord],
    ) -> Result<Option<String>, ReflectionError> {
        self.success_calls.fetch_add(1, Ordering::SeqCst);
        self.on_success.clone().map_err(ReflectionError::Failed)
    }
}

#[derive(Default)]
struct RecordingKnowledge {
    records: Mutex<Vec<LearningRecord>>,
}

impl RecordingKnowledge {
    fn records(&self) -> Vec<LearningRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeSink for RecordingKnowledge {
    async fn add_knowledge(&self, record: &LearningRecord) -> Result<(), KnowledgeError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

struct RejectingKnowledge;

#[async_trait]
impl KnowledgeSink for RejectingKnowledge {
    async fn add_knowledge(&self, _record: &LearningRecord) -> Result<(), KnowledgeError> {
        Err(KnowledgeError::Rejected("vector store offline".to_string()))
    }
}

#[derive(Clone, Default)]
struct MemorySink {
    events: Arc<Mutex<Vec<GoalEvent>>>,
}

impl MemorySink {
    fn events(&self) -> Vec<GoalEvent> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, event_type: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

impl NotificationSink for MemorySink {
    fn send(&self, event: &GoalEvent) -> Result<(), GoalError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// =========================================================
// Helpers
// =========================================================

fn step(action: &str) -> Step {
    Step::new(action, "orchestrator")
}

fn actions(goal: &Goal) -> Vec<&str> {
    goal.plan.iter().map(|s| s.action.as_str()).collect()
}

fn engine_with(
    executor: Arc<dyn Executor>,
    replanner: Arc<dyn Replanner>,
    reflection: Arc<dyn Reflection>,
    knowledge: Arc<dyn KnowledgeSink>,
) -> (GoalEngine, MemorySink) {
    let sink = MemorySink::default();
    let engine = GoalEngine::new(
        EngineConfig::default(),
        Collaborators::new(executor, replanner, reflection, knowledge),
    )
    .with_sink(Box::new(sink.clone()));
    (engine, sink)
}

// =========================================================
// Scenarios
// =========================================================

#[tokio::test]
async fn repeated_replan_of_one_step_trips_breaker_on_fourth_attempt() {
    let executor = ScriptedExecutor::new(|_, _| Ok(ExecutionResult::replan("review rejected")));
    let replanner = FixedReplanner::proposing(vec![step("review_plan")]);
    let reflection = ScriptedReflection::new(None, None);
    let (engine, sink) = engine_with(
        executor.clone(),
        replanner.clone(),
        reflection.clone(),
        Arc::new(RecordingKnowledge::default()),
    );

    let id = engine
        .submit("ship the release", vec![step("review_plan")])
        .unwrap();
    let goal = engine.run_goal(id).await.unwrap();

    assert!(matches!(goal.state, GoalState::Aborted { .. }));
    let reason = goal.state.reason().unwrap();
    assert!(reason.starts_with("circuit breaker tripped"), "{}", reason);
    assert!(reason.contains("repeat count 4"), "{}", reason);
    assert!(reason.contains("review_plan"), "{}", reason);

    assert_eq!(executor.calls().len(), 3);
    assert_eq!(replanner.calls(), 3);
    assert_eq!(goal.failures, 3);
    assert!(goal.execution_counters.is_empty());
    assert_eq!(engine.breaker().tracked_goals(), 0);
    assert_eq!(sink.count("breaker_tripped"), 1);
}

#[tokio::test]
async fn clean_plan_completes_and_captures_one_learning() {
    let executor = ScriptedExecutor::succeeding();
    let reflection = ScriptedReflection::new(None, Some("Read the README before editing."));
    let knowledge = Arc::new(RecordingKnowledge::default());
    let (engine, sink) = engine_with(
        executor.clone(),
        FixedReplanner::proposing(Vec::new()),
        reflection.clone(),
        knowledge.clone(),
    );

    let id = engine
        .submit(
            "document the parser",
            vec![step("read_file"), step("write_code"), step("review_code")],
        )
        .unwrap();
    let goal = engine.run_goal(id).await.unwrap();

    assert_eq!(goal.state, GoalState::Completed);
    assert!(goal.completion_time.is_some());
    assert_eq!(goal.current_step_index, 3);
    assert_eq!(goal.history.len(), 3);
    assert_eq!(executor.calls(), vec!["read_file", "write_code", "review_code"]);

    assert_eq!(reflection.success_calls.load(Ordering::SeqCst), 1);
    assert_eq!(reflection.replan_calls.load(Ordering::SeqCst), 0);

    let records = knowledge.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].narrative, "Read the README before editing.");
    assert_eq!(records[0].trigger, LearningTrigger::SuccessfulCompletion);
    assert_eq!(records[0].source_goal_id, id);
    assert_eq!(sink.count("learning_captured"), 1);
}

#[tokio::test]
async fn goal_past_runtime_ceiling_aborts_before_first_step() {
    let clock = Arc::new(ManualClock::starting_now());
    let executor = ScriptedExecutor::succeeding();
    let (engine, _sink) = engine_with(
        executor.clone(),
        FixedReplanner::proposing(Vec::new()),
        Arc::new(NoReflection),
        Arc::new(RecordingKnowledge::default()),
    );
    let engine = engine.with_clock(clock.clone());

    let mut goal = Goal::new("crawl the docs site", vec![step("open_page")]);
    goal.transition_at(GoalState::Active, clock.now() - ChronoDuration::seconds(301))
        .unwrap();
    let id = engine.adopt(goal).unwrap();

    let goal = engine.run_goal(id).await.unwrap();

    assert!(matches!(goal.state, GoalState::Aborted { .. }));
    let reason = goal.state.reason().unwrap();
    assert!(reason.contains("elapsed runtime 301s"), "{}", reason);
    assert!(!reason.contains("repeat count"), "{}", reason);
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn replan_replaces_the_failed_step_and_resumes_at_same_index() {
    let executor = ScriptedExecutor::new(|step, attempt| {
        if step.action == "B" && attempt == 1 {
            Ok(ExecutionResult::replan("B cannot proceed"))
        } else {
            Ok(ExecutionResult::success(Value::Null))
        }
    });
    let replanner = FixedReplanner::proposing(vec![step("X"), step("Y")]);
    let (engine, sink) = engine_with(
        executor.clone(),
        replanner.clone(),
        ScriptedReflection::new(None, None),
        Arc::new(RecordingKnowledge::default()),
    );

    let id = engine
        .submit("abc", vec![step("A"), step("B"), step("C")])
        .unwrap();
    let goal = engine.run_goal(id).await.unwrap();

    assert_eq!(goal.state, GoalState::Completed);
    assert_eq!(actions(&goal), vec!["A", "X", "Y", "C"]);
    assert_eq!(executor.calls(), vec!["A", "B", "X", "Y", "C"]);
    assert_eq!(goal.failures, 1);

    let splice = sink
        .events()
        .into_iter()
        .find_map(|e| match e {
            GoalEvent::PlanSpliced {
                index,
                replaced_action,
                inserted,
                ..
            } => Some((index, replaced_action, inserted)),
            _ => None,
        })
        .unwrap();
    assert_eq!(splice, (1, "B".to_string(), vec!["X".to_string(), "Y".to_string()]));
}

#[tokio::test]
async fn cursor_never_moves_backwards() {
    // Two recoveries: B twice asks for a replan before succeeding.
    let executor = ScriptedExecutor::new(|step, attempt| {
        if step.action == "B" && attempt <= 2 {
            Ok(ExecutionResult::replan("not yet"))
        } else {
            Ok(ExecutionResult::success(Value::Null))
        }
    });
    let (engine, sink) = engine_with(
        executor,
        FixedReplanner::proposing(vec![step("B")]),
        Arc::new(NoReflection),
        Arc::new(RecordingKnowledge::default()),
    );

    let id = engine
        .submit("g", vec![step("A"), step("B"), step("C")])
        .unwrap();
    let goal = engine.run_goal(id).await.unwrap();
    assert_eq!(goal.state, GoalState::Completed);

    // Position of the cursor after each event: a completed step moves it to
    // index + 1, a splice leaves it at index.
    let mut positions = vec![0usize];
    for event in sink.events() {
        match event {
            GoalEvent::StepCompleted { index, .. } => positions.push(index + 1),
            GoalEvent::PlanSpliced { index, .. } => {
                assert_eq!(Some(&index), positions.last(), "splice must not move the cursor");
                positions.push(index);
            }
            _ => {}
        }
    }
    assert!(positions.windows(2).all(|w| w[0] <= w[1]), "{:?}", positions);
    assert_eq!(positions.last(), Some(&3));
}

#[tokio::test]
async fn empty_replan_fails_goal_exactly_once() {
    let executor = ScriptedExecutor::new(|_, _| Ok(ExecutionResult::replan("stuck")));
    let replanner = FixedReplanner::proposing(Vec::new());
    let reflection = ScriptedReflection::new(Some("never used"), Some("never used"));
    let knowledge = Arc::new(RecordingKnowledge::default());
    let (engine, sink) = engine_with(executor, replanner.clone(), reflection.clone(), knowledge.clone());

    let id = engine.submit("g", vec![step("A"), step("B")]).unwrap();
    let goal = engine.run_goal(id).await.unwrap();

    assert_eq!(
        goal.state,
        GoalState::Failed {
            reason: "no recovery plan".to_string()
        }
    );
    assert_eq!(replanner.calls(), 1);
    assert_eq!(actions(&goal), vec!["A", "B"]);
    assert_eq!(reflection.replan_calls.load(Ordering::SeqCst), 0);
    assert_eq!(reflection.success_calls.load(Ordering::SeqCst), 0);
    assert!(knowledge.records().is_empty());

    let failed_transitions = sink
        .events()
        .iter()
        .filter(|e| matches!(e, GoalEvent::GoalStateChanged { to_state, .. } if to_state == "failed"))
        .count();
    assert_eq!(failed_transitions, 1);

    // Running again does nothing.
    let again = engine.run_goal(id).await.unwrap();
    assert_eq!(again.state, goal.state);
    assert_eq!(replanner.calls(), 1);
}

#[tokio::test]
async fn replanner_error_is_a_planning_failure() {
    let executor = ScriptedExecutor::new(|_, _| Ok(ExecutionResult::replan("stuck")));
    let (engine, _sink) = engine_with(
        executor,
        FixedReplanner::failing("model returned malformed JSON"),
        Arc::new(NoReflection),
        Arc::new(RecordingKnowledge::default()),
    );

    let id = engine.submit("g", vec![step("A")]).unwrap();
    let goal = engine.run_goal(id).await.unwrap();

    let reason = goal.state.reason().unwrap();
    assert!(matches!(goal.state, GoalState::Failed { .. }));
    assert!(reason.starts_with("no recovery plan"), "{}", reason);
    assert!(reason.contains("malformed JSON"), "{}", reason);
}

#[tokio::test]
async fn sentinel_narrative_never_reaches_knowledge_sink() {
    let executor = ScriptedExecutor::new(|step, attempt| {
        if step.action == "A" && attempt == 1 {
            Ok(ExecutionResult::replan("retry"))
        } else {
            Ok(ExecutionResult::success(Value::Null))
        }
    });
    let reflection = ScriptedReflection::new(
        Some("No generalization possible."),
        Some("Trace reviewed. No generalization possible."),
    );
    let knowledge = Arc::new(RecordingKnowledge::default());
    let (engine, sink) = engine_with(
        executor,
        FixedReplanner::proposing(vec![step("A2")]),
        reflection.clone(),
        knowledge.clone(),
    );

    let id = engine.submit("g", vec![step("A")]).unwrap();
    let goal = engine.run_goal(id).await.unwrap();

    assert_eq!(goal.state, GoalState::Completed);
    assert_eq!(reflection.replan_calls.load(Ordering::SeqCst), 1);
    assert_eq!(reflection.success_calls.load(Ordering::SeqCst), 1);
    assert!(knowledge.records().is_empty());
    assert_eq!(sink.count("learning_captured"), 0);
}

#[tokio::test]
async fn replan_recovery_narrative_is_captured() {
    let executor = ScriptedExecutor::new(|step, attempt| {
        if step.action == "login" && attempt == 1 {
            Ok(ExecutionResult::replan("form moved"))
        } else {
            Ok(ExecutionResult::success(Value::Null))
        }
    });
    let knowledge = Arc::new(RecordingKnowledge::default());
    let (engine, _sink) = engine_with(
        executor,
        FixedReplanner::proposing(vec![step("locate_form"), step("login_by_label")]),
        ScriptedReflection::new(Some("Locate forms by label, not position."), None),
        knowledge.clone(),
    );

    let id = engine.submit("log in", vec![step("login")]).unwrap();
    engine.run_goal(id).await.unwrap();

    let records = knowledge.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].trigger, LearningTrigger::ReplanRecovery);
}

#[tokio::test]
async fn reflection_and_knowledge_failures_are_absorbed() {
    let (engine, sink) = engine_with(
        ScriptedExecutor::succeeding(),
        FixedReplanner::proposing(Vec::new()),
        ScriptedReflection::failing(),
        Arc::new(RecordingKnowledge::default()),
    );
    let id = engine.submit("g", vec![step("A")]).unwrap();
    let goal = engine.run_goal(id).await.unwrap();
    assert_eq!(goal.state, GoalState::Completed);
    assert_eq!(sink.count("reflection_failed"), 1);

    let (engine, sink) = engine_with(
        ScriptedExecutor::succeeding(),
        FixedReplanner::proposing(Vec::new()),
        ScriptedReflection::new(None, Some("worth keeping")),
        Arc::new(RejectingKnowledge),
    );
    let id = engine.submit("g", vec![step("A")]).unwrap();
    let goal = engine.run_goal(id).await.unwrap();
    assert_eq!(goal.state, GoalState::Completed);
    assert_eq!(sink.count("knowledge_write_failed"), 1);
    assert_eq!(sink.count("learning_captured"), 0);
}

#[tokio::test]
async fn unrecoverable_step_fails_without_replanning() {
    let executor = ScriptedExecutor::new(|step, _| {
        if step.action == "write_code" {
            Ok(ExecutionResult::failure("disk full"))
        } else {
            Ok(ExecutionResult::success(Value::Null))
        }
    });
    let replanner = FixedReplanner::proposing(vec![step("never")]);
    let (engine, _sink) = engine_with(
        executor.clone(),
        replanner.clone(),
        Arc::new(NoReflection),
        Arc::new(RecordingKnowledge::default()),
    );

    let id = engine
        .submit("g", vec![step("read_file"), step("write_code"), step("review_code")])
        .unwrap();
    let goal = engine.run_goal(id).await.unwrap();

    assert_eq!(
        goal.state,
        GoalState::Failed {
            reason: "step 'write_code' failed: disk full".to_string()
        }
    );
    assert_eq!(replanner.calls(), 0);
    assert_eq!(executor.calls(), vec!["read_file", "write_code"]);
    assert_eq!(goal.current_step_index, 1);
}

#[tokio::test]
async fn executor_error_fails_the_goal() {
    let executor = ScriptedExecutor::new(|_, _| Err(ExecutorError::Failed("tool crashed".to_string())));
    let (engine, _sink) = engine_with(
        executor,
        FixedReplanner::proposing(Vec::new()),
        Arc::new(NoReflection),
        Arc::new(RecordingKnowledge::default()),
    );

    let id = engine.submit("g", vec![step("A")]).unwrap();
    let goal = engine.run_goal(id).await.unwrap();
    assert_eq!(goal.state.reason(), Some("step 'A' failed: executor failed: tool crashed"));
}

struct SlowExecutor;

#[async_trait]
impl Executor for SlowExecutor {
    async fn execute(&self, _step: &Step) -> Result<ExecutionResult, ExecutorError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ExecutionResult::success(Value::Null))
    }
}

#[tokio::test(start_paused = true)]
async fn executor_timeout_fails_the_goal() {
    let config = EngineConfig::from_toml_str("[timeouts]\nexecutor_secs = 1\n").unwrap();
    let engine = GoalEngine::new(
        config,
        Collaborators::new(
            Arc::new(SlowExecutor),
            FixedReplanner::proposing(Vec::new()),
            Arc::new(NoReflection),
            Arc::new(RecordingKnowledge::default()),
        ),
    );

    let id = engine.submit("g", vec![step("crawl")]).unwrap();
    let goal = engine.run_goal(id).await.unwrap();
    assert_eq!(
        goal.state.reason(),
        Some("step 'crawl' failed: executor timed out after 1s")
    );
}

#[tokio::test]
async fn force_complete_is_idempotent() {
    let executor = ScriptedExecutor::succeeding();
    let knowledge = Arc::new(RecordingKnowledge::default());
    let dir = tempdir().unwrap();
    let store = GoalStore::new(dir.path()).unwrap();
    let (engine, sink) = engine_with(
        executor.clone(),
        FixedReplanner::proposing(Vec::new()),
        ScriptedReflection::new(Some("x"), Some("x")),
        knowledge.clone(),
    );
    let engine = engine.with_store(store);

    let id = engine
        .submit("review loop", vec![step("review_plan"), step("revise")])
        .unwrap();

    let first = engine.force_complete(id, "stuck in review loop").unwrap();
    let second = engine.force_complete(id, "stuck in review loop").unwrap();

    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
    assert_eq!(first.state, GoalState::Completed);
    assert_eq!(first.completion_note.as_deref(), Some("stuck in review loop"));
    assert!(first.plan.is_empty());
    assert_eq!(first.execution_count, 999);
    assert_eq!(sink.count("goal_force_completed"), 1);
    assert!(knowledge.records().is_empty());

    let stored = engine.store().unwrap().get(id).unwrap().unwrap();
    assert_eq!(stored.completion_note.as_deref(), Some("stuck in review loop"));

    // Exempt goals never execute again.
    let ran = engine.run_goal(id).await.unwrap();
    assert_eq!(ran.state, GoalState::Completed);
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn cancellation_waits_for_in_flight_step() {
    let executor = GatedExecutor::new();
    let (engine, _sink) = engine_with(
        executor.clone(),
        FixedReplanner::proposing(Vec::new()),
        Arc::new(NoReflection),
        Arc::new(RecordingKnowledge::default()),
    );
    let engine = Arc::new(engine);

    let id = engine.submit("g", vec![step("A"), step("B")]).unwrap();
    let handle = engine.spawn(id);

    executor.started.notified().await;
    engine.cancel(id).unwrap();
    executor.release.notify_one();

    let goal = handle.await.unwrap().unwrap();
    assert_eq!(
        goal.state,
        GoalState::Aborted {
            reason: "cancelled at step boundary".to_string()
        }
    );
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(goal.history.len(), 1);
    assert_eq!(goal.current_step_index, 1);
}

#[tokio::test]
async fn second_run_of_the_same_goal_is_busy() {
    let executor = GatedExecutor::new();
    let (engine, _sink) = engine_with(
        executor.clone(),
        FixedReplanner::proposing(Vec::new()),
        Arc::new(NoReflection),
        Arc::new(RecordingKnowledge::default()),
    );
    let engine = Arc::new(engine);

    let id = engine.submit("g", vec![step("A")]).unwrap();
    let handle = engine.spawn(id);
    executor.started.notified().await;

    assert!(matches!(engine.run_goal(id).await, Err(EngineError::GoalBusy(busy)) if busy == id));
    assert!(matches!(engine.adopt(engine.inspect(id).unwrap()), Err(EngineError::GoalBusy(_))));

    executor.release.notify_one();
    let goal = handle.await.unwrap().unwrap();
    assert_eq!(goal.state, GoalState::Completed);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_goals_do_not_share_breaker_counters() {
    let (engine, _sink) = engine_with(
        ScriptedExecutor::new(|_, _| Ok(ExecutionResult::success(Value::Null))),
        FixedReplanner::proposing(Vec::new()),
        Arc::new(NoReflection),
        Arc::new(RecordingKnowledge::default()),
    );
    let engine = Arc::new(engine);

    // Each goal repeats the same action exactly up to the limit.
    let ids: Vec<_> = (0..8)
        .map(|i| {
            engine
                .submit(format!("goal {}", i), vec![step("poll"), step("poll"), step("poll")])
                .unwrap()
        })
        .collect();
    let handles: Vec<_> = ids.iter().map(|id| engine.spawn(*id)).collect();

    for handle in handles {
        let goal = handle.await.unwrap().unwrap();
        assert_eq!(goal.state, GoalState::Completed, "{:?}", goal.state.reason());
        assert_eq!(goal.history.len(), 3);
    }
    assert_eq!(engine.breaker().tracked_goals(), 0);
}

// =========================================================
// Capability registry integration
// =========================================================

struct Succeed(&'static str);

#[async_trait]
impl Capability for Succeed {
    fn name(&self) -> &str {
        self.0
    }

    async fn invoke(&self, parameters: &Map<String, Value>) -> Result<ExecutionResult, ExecutorError> {
        Ok(ExecutionResult::success(json!({ "params": parameters })))
    }
}

struct NeedsReplan;

#[async_trait]
impl Capability for NeedsReplan {
    fn name(&self) -> &str {
        "open_page"
    }

    async fn invoke(&self, _parameters: &Map<String, Value>) -> Result<ExecutionResult, ExecutorError> {
        Ok(ExecutionResult::replan("page layout changed"))
    }
}

fn registry() -> Arc<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::new(Succeed("read_file")));
    registry.register(Arc::new(NeedsReplan));
    Arc::new(registry)
}

#[tokio::test]
async fn unknown_action_is_rejected_at_submit() {
    let (engine, sink) = engine_with(
        registry(),
        FixedReplanner::proposing(Vec::new()),
        Arc::new(NoReflection),
        Arc::new(RecordingKnowledge::default()),
    );

    let err = engine
        .submit("g", vec![step("read_file"), step("launch_rockets")])
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Planning(PlanningError::UnknownAction { action }) if action == "launch_rockets"
    ));
    assert!(engine.list().is_empty());
    assert_eq!(sink.count("goal_submitted"), 0);
}

#[tokio::test]
async fn replacement_with_unknown_action_fails_the_goal() {
    let (engine, _sink) = engine_with(
        registry(),
        FixedReplanner::proposing(vec![step("read_file"), step("scrape_with_browser")]),
        Arc::new(NoReflection),
        Arc::new(RecordingKnowledge::default()),
    );

    let id = engine
        .submit("g", vec![step("read_file").with_param("path", "a.md"), step("open_page")])
        .unwrap();
    let goal = engine.run_goal(id).await.unwrap();

    let reason = goal.state.reason().unwrap();
    assert!(matches!(goal.state, GoalState::Failed { .. }));
    assert!(reason.starts_with("no recovery plan"), "{}", reason);
    assert!(reason.contains("scrape_with_browser"), "{}", reason);
    assert_eq!(actions(&goal), vec!["read_file", "open_page"]);
    assert_eq!(goal.history[0].output["params"]["path"], "a.md");
}

// =========================================================
// Persistence
// =========================================================

#[tokio::test]
async fn goals_survive_an_engine_restart() {
    let dir = tempdir().unwrap();

    let (engine, _sink) = engine_with(
        ScriptedExecutor::succeeding(),
        FixedReplanner::proposing(Vec::new()),
        Arc::new(NoReflection),
        Arc::new(RecordingKnowledge::default()),
    );
    let engine = engine.with_store(GoalStore::new(dir.path()).unwrap());
    let done = engine.submit("finished", vec![step("A")]).unwrap();
    let waiting = engine.submit("waiting", vec![step("B")]).unwrap();
    engine.run_goal(done).await.unwrap();

    // A half-written record from a crash.
    std::fs::write(dir.path().join(format!("{}.json", uuid::Uuid::new_v4())), "{\"id\": ").unwrap();

    let executor = ScriptedExecutor::succeeding();
    let (restarted, sink) = engine_with(
        executor.clone(),
        FixedReplanner::proposing(Vec::new()),
        Arc::new(NoReflection),
        Arc::new(RecordingKnowledge::default()),
    );
    let restarted = restarted.with_store(GoalStore::new(dir.path()).unwrap());
    let report = restarted.load_from_store().unwrap();

    assert_eq!(report.goals.len(), 2);
    assert_eq!(report.quarantined.len(), 1);
    assert_eq!(sink.count("record_quarantined"), 1);
    assert_eq!(restarted.inspect(done).unwrap().state, GoalState::Completed);

    let resumed = restarted.run_goal(waiting).await.unwrap();
    assert_eq!(resumed.state, GoalState::Completed);
    assert_eq!(executor.calls(), vec!["B"]);
}

// =========================================================
// Interference with a running goal
// =========================================================

/// Blocks inside `propose_plan` until released.
struct GatedReplanner {
    proposal: Vec<Step>,
    started: Notify,
    release: Notify,
}

impl GatedReplanner {
    fn proposing(proposal: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            proposal,
            started: Notify::new(),
            release: Notify::new(),
        })
    }
}

#[async_trait]
impl Replanner for GatedReplanner {
    async fn propose_plan(
        &self,
        _goal_description: &str,
        _failed_step: &Step,
        _history: &[StepRecord],
    ) -> Result<Vec<Step>, PlanningError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(self.proposal.clone())
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Wall-clock time that runs a one-shot hook the first time it is read.
#[derive(Default)]
struct HookedClock {
    hook: Mutex<Option<Hook>>,
}

impl HookedClock {
    fn arm(&self, hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }
}

impl fmt::Debug for HookedClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookedClock").finish_non_exhaustive()
    }
}

impl Clock for HookedClock {
    fn now(&self) -> DateTime<Utc> {
        let hook = self.hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        Utc::now()
    }
}

#[tokio::test]
async fn force_complete_during_a_step_wins_over_the_run() {
    let executor = GatedExecutor::new();
    let reflection = ScriptedReflection::new(None, Some("Always check the cache."));
    let knowledge = Arc::new(RecordingKnowledge::default());
    let (engine, sink) = engine_with(
        executor.clone(),
        FixedReplanner::proposing(Vec::new()),
        reflection.clone(),
        knowledge.clone(),
    );
    let engine = Arc::new(engine);

    let id = engine.submit("g", vec![step("A"), step("B")]).unwrap();
    let handle = engine.spawn(id);
    executor.started.notified().await;

    let forced = engine.force_complete(id, "finished by hand").unwrap();
    executor.release.notify_one();
    let goal = handle.await.unwrap().unwrap();

    assert_eq!(goal.state, GoalState::Completed);
    assert_eq!(goal.completion_note.as_deref(), Some("finished by hand"));
    assert_eq!(goal.updated_at, forced.updated_at);
    assert!(goal.plan.is_empty());
    assert!(goal.history.is_empty());
    assert!(goal.execution_counters.is_empty());

    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(reflection.success_calls.load(Ordering::SeqCst), 0);
    assert!(knowledge.records().is_empty());
    assert_eq!(sink.count("step_completed"), 0);
    assert_eq!(engine.breaker().tracked_goals(), 0);
}

#[tokio::test]
async fn force_complete_between_state_read_and_breaker_check_leaves_no_tally() {
    let clock = Arc::new(HookedClock::default());
    let breaker = Arc::new(CircuitBreaker::with_clock(
        EngineConfig::default().breaker_config(),
        clock.clone(),
    ));
    let executor = ScriptedExecutor::succeeding();
    let (engine, _sink) = engine_with(
        executor.clone(),
        FixedReplanner::proposing(Vec::new()),
        Arc::new(NoReflection),
        Arc::new(RecordingKnowledge::default()),
    );
    let engine = Arc::new(engine.with_breaker(breaker));

    let id = engine.submit("g", vec![step("A")]).unwrap();
    // The breaker reads its clock only inside `check`.
    let overriding = Arc::clone(&engine);
    clock.arm(move || {
        overriding.force_complete(id, "closed by operator").unwrap();
    });

    let goal = engine.run_goal(id).await.unwrap();

    assert_eq!(goal.state, GoalState::Completed);
    assert_eq!(goal.completion_note.as_deref(), Some("closed by operator"));
    assert!(goal.execution_counters.is_empty());
    assert!(executor.calls().is_empty());
    assert_eq!(engine.breaker().tracked_goals(), 0);
}

#[tokio::test]
async fn cancellation_during_replanning_is_honoured_after_the_splice() {
    let executor = ScriptedExecutor::new(|step, attempt| {
        if step.action == "B" && attempt == 1 {
            Ok(ExecutionResult::replan("schema changed"))
        } else {
            Ok(ExecutionResult::success(Value::Null))
        }
    });
    let replanner = GatedReplanner::proposing(vec![step("X")]);
    let reflection = ScriptedReflection::new(Some("Re-read the schema."), None);
    let knowledge = Arc::new(RecordingKnowledge::default());
    let (engine, sink) = engine_with(
        executor.clone(),
        replanner.clone(),
        reflection.clone(),
        knowledge.clone(),
    );
    let engine = Arc::new(engine);

    let id = engine
        .submit("g", vec![step("A"), step("B"), step("C")])
        .unwrap();
    let handle = engine.spawn(id);

    replanner.started.notified().await;
    engine.cancel(id).unwrap();
    assert_eq!(engine.inspect(id).unwrap().state, GoalState::Replanning);
    replanner.release.notify_one();

    let goal = handle.await.unwrap().unwrap();
    assert_eq!(
        goal.state,
        GoalState::Aborted {
            reason: "cancelled after replan".to_string()
        }
    );
    assert_eq!(actions(&goal), vec!["A", "X", "C"]);
    assert_eq!(goal.current_step_index, 1);
    assert_eq!(goal.failures, 1);
    assert_eq!(sink.count("plan_spliced"), 1);

    assert_eq!(executor.calls(), vec!["A", "B"]);
    assert_eq!(reflection.replan_calls.load(Ordering::SeqCst), 0);
    assert!(knowledge.records().is_empty());
    assert_eq!(engine.breaker().tracked_goals(), 0);
}

// =========================================================
// Knowledge capture
// =========================================================

struct StalledKnowledge;

#[async_trait]
impl KnowledgeSink for StalledKnowledge {
    async fn add_knowledge(&self, _record: &LearningRecord) -> Result<(), KnowledgeError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn knowledge_timeout_is_reported_and_absorbed() {
    let (engine, sink) = engine_with(
        ScriptedExecutor::succeeding(),
        FixedReplanner::proposing(Vec::new()),
        ScriptedReflection::new(None, Some("Batch the writes.")),
        Arc::new(StalledKnowledge),
    );

    let id = engine.submit("g", vec![step("A")]).unwrap();
    let goal = engine.run_goal(id).await.unwrap();
    assert_eq!(goal.state, GoalState::Completed);

    let failure = sink
        .events()
        .into_iter()
        .find_map(|e| match e {
            GoalEvent::KnowledgeWriteFailed { error, .. } => Some(error),
            _ => None,
        })
        .unwrap();
    assert_eq!(failure, "knowledge sink timed out after 10s");
}

#[tokio::test]
async fn project_collaborators_write_learnings_to_the_knowledge_log() {
    let dir = tempdir().unwrap();
    let layout = WorkspaceLayout::for_project(dir.path());
    let collaborators = Collaborators::for_project(
        &layout,
        ScriptedExecutor::succeeding(),
        FixedReplanner::proposing(Vec::new()),
        ScriptedReflection::new(None, Some("Cache the login token.")),
    );
    let engine = GoalEngine::for_project(&layout, EngineConfig::default(), collaborators).unwrap();

    let id = engine.submit("sync calendars", vec![step("login"), step("sync")]).unwrap();
    engine.run_goal(id).await.unwrap();

    let records = JsonlKnowledgeSink::new(&layout.knowledge_log)
        .read_all()
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source_goal_id, id);
    assert_eq!(records[0].trigger, LearningTrigger::SuccessfulCompletion);
    assert_eq!(records[0].narrative, "Cache the login token.");
}
