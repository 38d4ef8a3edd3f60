mod app;
mod config;
mod engine;
mod logging;
mod paths;
mod prompts;
mod provider;
mod repl;
mod session;
mod skills;
mod state_fs;
mod workspace;

use crate::config::Config;
use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "axon", version)]
#[command(about = "Axon agent execution runtime", long_about = None)]
struct Cli {
    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List saved sessions
    Sessions,
    /// List the enabled tool catalog
    Tools,
    /// Remove session workspaces older than the cutoff
    Cleanup {
        /// Age cutoff in days
        #[arg(long, default_value_t = 7)]
        days: u64,
    },
    /// Delete a saved session
    Remove {
        /// Thread id of the session to delete
        thread_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    let (log_dir, _log_guard) = logging::init(logging::LoggingSettings {
        level: cli
            .log_level
            .as_deref()
            .or(config.logging.level.as_deref()),
        directory: config.logging.directory.as_deref(),
        retention_days: config.logging.retention_days,
    })?;
    tracing::info!("Logging to {}", log_dir.display());

    let application = app::build_application(config)?;

    match cli.cmd {
        None => repl::run_repl(application).await,
        Some(Command::Sessions) => {
            for record in application.sessions.list()? {
                println!(
                    "{}  messages={}  created={}  updated={}",
                    record.thread_id, record.message_count, record.created_at, record.updated_at
                );
            }
            Ok(())
        }
        Some(Command::Tools) => {
            let registry = application
                .deps
                .registry
                .read()
                .expect("tool registry lock poisoned");
            for name in registry.enabled_names() {
                let meta = registry.metadata_for(&name);
                println!("{}  risk={}  subagent={}", name, meta.risk, meta.available_to_subagent);
            }
            Ok(())
        }
        Some(Command::Cleanup { days }) => {
            let cleaned = application.sessions.cleanup_workspaces(days);
            println!("removed {} workspaces older than {} days", cleaned, days);
            Ok(())
        }
        Some(Command::Remove { thread_id }) => {
            application.sessions.remove(&thread_id)?;
            println!("removed session {}", thread_id);
            Ok(())
        }
    }
}
