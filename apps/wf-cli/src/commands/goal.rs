// goal.rs — Goal subcommands: list, inspect, force-complete.

use clap::Subcommand;
use uuid::Uuid;
use wf_engine::{Collaborators, EngineConfig, GoalEngine, WorkspaceLayout};
use wf_goal::{Goal, GoalStore};

#[derive(Subcommand)]
pub enum GoalCommands {
    /// List all goals.
    List {
        /// Filter by state (e.g., "active", "failed", "aborted").
        #[arg(long)]
        state: Option<String>,
    },
    /// Show the full record for a goal.
    Inspect {
        /// Goal ID.
        id: String,
        /// Print the raw JSON record.
        #[arg(long)]
        json: bool,
    },
    /// Mark a goal completed regardless of its state and exempt it from
    /// further automatic execution.
    ForceComplete {
        /// Goal ID.
        id: String,
        /// Operator note recorded on the goal.
        #[arg(long)]
        reason: String,
    },
}

pub fn execute(cmd: &GoalCommands, layout: &WorkspaceLayout) -> anyhow::Result<()> {
    match cmd {
        GoalCommands::List { state } => {
            let store = GoalStore::new(&layout.goals_dir)?;
            list_goals(&filter_goals(&store, state.as_deref())?)
        }
        GoalCommands::Inspect { id, json } => {
            let store = GoalStore::new(&layout.goals_dir)?;
            inspect_goal(&find_goal(&store, parse_id(id)?)?, *json)
        }
        GoalCommands::ForceComplete { id, reason } => {
            let id = parse_id(id)?;
            let engine = open_engine(layout, id)?;
            let already = engine.inspect(id)?.is_force_completed_with(reason);
            let goal = engine.force_complete(id, reason)?;
            if already {
                println!("Goal {} was already force-completed with this note.", goal.id);
            } else {
                println!("Goal {} force-completed.", goal.id);
                println!("Note: {}", reason);
            }
            Ok(())
        }
    }
}

/// An engine holding just `goal_id`, with nothing able to execute.
///
/// Other records are left as they are; repairing and quarantining is the
/// job of `wf store verify`.
pub fn open_engine(layout: &WorkspaceLayout, goal_id: Uuid) -> anyhow::Result<GoalEngine> {
    tracing::debug!(root = %layout.project_root.display(), %goal_id, "opening goal store");
    let config = EngineConfig::load_or_default(&layout.config_file)?;
    let engine = GoalEngine::for_project(layout, config, Collaborators::offline())?;
    let store = GoalStore::new(&layout.goals_dir)?;
    engine.adopt(find_goal(&store, goal_id)?)?;
    Ok(engine)
}

fn find_goal(store: &GoalStore, goal_id: Uuid) -> anyhow::Result<Goal> {
    store
        .get(goal_id)?
        .ok_or_else(|| anyhow::anyhow!("goal not found: {}", goal_id))
}

fn parse_id(id: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(id).map_err(|e| anyhow::anyhow!("invalid goal id '{}': {}", id, e))
}

/// Goals shown by `wf goal list`, newest first. Unreadable records are
/// skipped, not touched.
pub fn filter_goals(store: &GoalStore, state: Option<&str>) -> anyhow::Result<Vec<Goal>> {
    Ok(store
        .list()?
        .into_iter()
        .filter(|g| state.map_or(true, |s| g.state.to_string() == s))
        .collect())
}

fn list_goals(goals: &[Goal]) -> anyhow::Result<()> {
    if goals.is_empty() {
        println!("No goals found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<30} {:<12} {:<8} {:<8}",
        "ID", "DESCRIPTION", "STATE", "STEP", "FAILS"
    );
    println!("{}", "-".repeat(98));

    for g in goals {
        println!(
            "{:<38} {:<30} {:<12} {:<8} {:<8}",
            g.id,
            truncate(&g.description, 28),
            g.state.to_string(),
            format!("{}/{}", g.current_step_index, g.plan.len()),
            g.failures,
        );
    }
    println!("\n{} goal(s) total.", goals.len());

    Ok(())
}

fn inspect_goal(goal: &Goal, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(goal)?);
        return Ok(());
    }

    println!("Goal:        {}", goal.id);
    println!("Description: {}", goal.description);
    println!("State:       {}", goal.state);
    if let Some(reason) = goal.state.reason() {
        println!("Reason:      {}", reason);
    }
    println!("Created:     {}", goal.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(start) = goal.start_time {
        println!("Started:     {}", start.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(done) = goal.completion_time {
        println!("Finished:    {}", done.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(note) = &goal.completion_note {
        println!("Note:        {}", note);
    }
    println!("Failures:    {}", goal.failures);
    if goal.is_exempt() {
        println!("Exempt:      yes");
    }

    if goal.plan.is_empty() {
        println!("\nPlan: (empty)");
    } else {
        println!("\nPlan:");
        for (i, step) in goal.plan.iter().enumerate() {
            let marker = if i == goal.current_step_index { ">" } else { " " };
            println!(
                "  {} {:>2}. {:<24} {:<16} {:?}",
                marker, i, step.action, step.assigned_persona, step.risk
            );
        }
    }

    if !goal.execution_counters.is_empty() {
        println!("\nAttempts:");
        for (action, count) in &goal.execution_counters {
            println!("  {:<24} {}", action, count);
        }
    }

    if !goal.history.is_empty() {
        println!("\nHistory:");
        for record in &goal.history {
            println!(
                "  {}  {}",
                record.completed_at.format("%H:%M:%S"),
                record.step.action
            );
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}
