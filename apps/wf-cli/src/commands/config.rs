// config.rs — Config subcommands: check.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use wf_engine::{EngineConfig, WorkspaceLayout};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Load and validate the engine configuration.
    Check {
        /// Config file (defaults to .wayfinder/wayfinder.toml).
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

pub fn execute(cmd: &ConfigCommands, layout: &WorkspaceLayout) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Check { path } => {
            let path = path.as_deref().unwrap_or(&layout.config_file);
            let config = check_config(path)?;
            print_config(path, &config);
            Ok(())
        }
    }
}

/// Load `path` (defaults when it does not exist) and validate it.
pub fn check_config(path: &Path) -> anyhow::Result<EngineConfig> {
    EngineConfig::load_or_default(path)
        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))
}

fn print_config(path: &Path, config: &EngineConfig) {
    if path.exists() {
        println!("Config: {} (valid)", path.display());
    } else {
        println!("Config: {} (not found, using defaults)", path.display());
    }
    println!();
    println!("  max_step_repeats       {}", config.breaker.max_step_repeats);
    println!("  max_goal_runtime       {}s", config.breaker.max_goal_runtime_secs);
    println!("  executor timeout       {}s", config.timeouts.executor_secs);
    println!("  replanner timeout      {}s", config.timeouts.replanner_secs);
    println!("  reflection timeout     {}s", config.timeouts.reflection_secs);
    println!("  knowledge timeout      {}s", config.timeouts.knowledge_secs);
    println!("  reflection sentinel    {:?}", config.reflection.sentinel);
}
