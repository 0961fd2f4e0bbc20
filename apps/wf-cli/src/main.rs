//! # wf-cli
//!
//! Command-line interface for Wayfinder.
//!
//! Administrative access to the goal records a project's engine persists:
//! - `wf goal list/inspect` — read-only diagnostics
//! - `wf goal force-complete` — the administrative override
//! - `wf store verify` — load every record, repairing or quarantining as needed
//! - `wf config check` — validate `.wayfinder/wayfinder.toml`

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wf_engine::WorkspaceLayout;

/// Wayfinder CLI — inspect and administer goals.
#[derive(Parser)]
#[command(name = "wf", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and administer goals.
    Goal {
        #[command(subcommand)]
        command: commands::goal::GoalCommands,
    },
    /// Check the goal store.
    Store {
        #[command(subcommand)]
        command: commands::store::StoreCommands,
    },
    /// Check the engine configuration.
    Config {
        #[command(subcommand)]
        command: commands::config::ConfigCommands,
    },
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so command output on stdout stays scriptable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("wf_engine=info".parse()?)
                .add_directive("wf_cli=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);
    let layout = WorkspaceLayout::for_project(&project_root);

    match &cli.command {
        Commands::Goal { command } => commands::goal::execute(command, &layout),
        Commands::Store { command } => commands::store::execute(command, &layout),
        Commands::Config { command } => commands::config::execute(command, &layout),
    }
}
