//! taskpulse - user activity telemetry daemon
//!
//! Consumes page event messages as NDJSON on stdin, classifies engagement
//! through the core state machine, and exports attributed metrics to an
//! OTLP collector on a fixed period.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use taskpulse_core::store::ConfigPatch;
use taskpulse_core::{paths, ActivityTracker, InboundMessage, StateStore, TrackerConfig};

#[derive(Parser)]
#[command(name = "taskpulse", version, about = "User activity telemetry exporter")]
struct Cli {
    /// Override the persisted state file location
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Consume NDJSON event messages on stdin and export metrics (default)
    Run,
    /// Print queue depth, pending checkpoint, and current configuration
    Status,
    /// Show or change tracker configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current configuration
    Show,
    /// Change configuration fields; unset flags are left unchanged
    Set {
        /// Collector base URL
        #[arg(long)]
        endpoint: Option<String>,
        /// Inactivity threshold in milliseconds
        #[arg(long)]
        idle_timeout_ms: Option<i64>,
        /// Enable or disable tracking
        #[arg(long)]
        enabled: Option<bool>,
        /// Machine identity attached to every metric
        #[arg(long)]
        machine_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let state_path = cli.state_file.unwrap_or_else(paths::state_file_path);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(state_path).await,
        Command::Status => status(state_path),
        Command::Config { action } => config(state_path, action),
    }
}

async fn run(state_path: PathBuf) -> Result<()> {
    let _log_guard =
        taskpulse_core::logging::init("info").context("failed to initialize logging")?;

    tracing::info!(state_file = %state_path.display(), "taskpulse starting up");

    let store = StateStore::load(&state_path);
    let mut tracker = ActivityTracker::new(store).context("failed to build tracker")?;
    tracker.start_idle_check();
    tracker.start_export_loop();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundMessage>(line) {
            Ok(message) => tracker.handle_message(message),
            Err(e) => tracing::warn!(error = %e, "dropping malformed event message"),
        }
    }

    // Event source closed; stop the timers and flush what remains.
    tracker.stop_idle_check();
    tracker.stop_export_loop();
    let outcome = tracker.export_now().await;
    tracing::info!(?outcome, "final export cycle complete, shutting down");

    Ok(())
}

fn status(state_path: PathBuf) -> Result<()> {
    let store = StateStore::load(&state_path);
    println!("state file: {}", state_path.display());
    println!(
        "pending:    {} metrics awaiting confirmed export",
        store.pending_metrics().len()
    );
    print_config(&store.config());
    Ok(())
}

fn config(state_path: PathBuf, action: ConfigAction) -> Result<()> {
    let mut store = StateStore::load(&state_path);
    match action {
        ConfigAction::Show => print_config(&store.config()),
        ConfigAction::Set {
            endpoint,
            idle_timeout_ms,
            enabled,
            machine_id,
        } => {
            store
                .save_config(ConfigPatch {
                    endpoint,
                    idle_timeout_ms,
                    enabled,
                    machine_id,
                    ..Default::default()
                })
                .context("failed to save configuration")?;
            print_config(&store.config());
        }
    }
    Ok(())
}

fn print_config(config: &TrackerConfig) {
    println!("machine id:   {}", config.machine_id);
    println!("endpoint:     {}", config.endpoint);
    println!("idle timeout: {} ms", config.idle_timeout_ms);
    println!("enabled:      {}", config.enabled);
    println!("sidebar open: {}", config.sidebar_open);
}
