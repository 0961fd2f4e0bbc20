// store.rs — Store subcommands: verify.

use clap::Subcommand;
use wf_engine::WorkspaceLayout;
use wf_goal::{GoalStore, LoadReport};

#[derive(Subcommand)]
pub enum StoreCommands {
    /// Load every goal record, repairing or quarantining damaged ones.
    Verify,
}

pub fn execute(cmd: &StoreCommands, layout: &WorkspaceLayout) -> anyhow::Result<()> {
    match cmd {
        StoreCommands::Verify => {
            let report = verify_store(layout)?;
            print_report(layout, &report);
            Ok(())
        }
    }
}

pub fn verify_store(layout: &WorkspaceLayout) -> anyhow::Result<LoadReport> {
    let store = GoalStore::new(&layout.goals_dir)?;
    Ok(store.load_all()?)
}

fn print_report(layout: &WorkspaceLayout, report: &LoadReport) {
    println!("Store:       {}", layout.goals_dir.display());
    println!("Loaded:      {} goal(s)", report.goals.len());

    if report.is_clean() {
        println!("All records are intact.");
        return;
    }

    if !report.repaired.is_empty() {
        println!("\nRepaired ({}):", report.repaired.len());
        for id in &report.repaired {
            println!("  {}", id);
        }
    }

    if !report.quarantined.is_empty() {
        println!("\nQuarantined ({}):", report.quarantined.len());
        for record in &report.quarantined {
            println!("  {}", record.file_name);
            println!("    moved to: {}", record.path.display());
            println!("    error:    {}", record.error);
        }
    }
}
