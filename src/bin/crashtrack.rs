//! Crashtrack CLI Binary
//!
//! Command-line interface over the crash aggregation engine: run aggregation
//! or maintenance passes and inspect the resulting records and dump queues.

use anyhow::Context;
use clap::{Parser, Subcommand};
use crashtrack::config::ManagerConfig;
use crashtrack::logging::{init_logging, LoggingConfig};
use crashtrack::manager::CrashManager;
use crashtrack::scanner::DumpEntry;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

/// Crashtrack CLI - crash report aggregation
#[derive(Parser)]
#[command(name = "crashtrack")]
#[command(about = "Aggregate crash reporter event files into a queryable store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (JSON)
    #[arg(long)]
    config: PathBuf,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume event files and fold them into the store
    Aggregate,
    /// Print every crash record as JSON
    List,
    /// Print one crash record with its submission history
    Show {
        /// Crash id to look up
        crash_id: String,
    },
    /// List minidumps waiting for submission, newest first
    Pending,
    /// List receipts of already-submitted dumps, newest first
    Submitted,
    /// Run one maintenance pass (aggregate, then prune old records)
    Maintenance,
}

fn main() {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!("Crashtrack CLI starting");

    match run(&cli) {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<String> {
    let config = ManagerConfig::from_json_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    let manager = CrashManager::new(config)?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(execute(&manager, &cli.command))
}

async fn execute(manager: &CrashManager, command: &Commands) -> anyhow::Result<String> {
    match command {
        Commands::Aggregate => {
            let processed = manager.aggregate_events_files().await;
            Ok(format!("Processed {} event file(s)", processed))
        }
        Commands::List => {
            let crashes = manager.get_crashes().await;
            serde_json::to_string_pretty(&crashes).context("failed to render crash records")
        }
        Commands::Show { crash_id } => {
            let record = manager
                .get_crash(crash_id)
                .await
                .with_context(|| format!("no crash record for id {}", crash_id))?;

            let mut lines = vec![format!("Crash {}", record.id)];
            lines.push(format!(
                "  type:       {}",
                record.type_label().unwrap_or_else(|| "(none yet)".to_string())
            ));
            lines.push(format!(
                "  date:       {}",
                record
                    .crash_date
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_else(|| "(none yet)".to_string())
            ));
            if let Some(remote_id) = &record.remote_id {
                lines.push(format!("  remote id:  {}", remote_id));
            }
            if !record.classifications.is_empty() {
                lines.push(format!("  classified: {}", record.classifications.join(", ")));
            }
            for submission in record.submissions.iter() {
                lines.push(format!(
                    "  submission {} [{}] requested {}",
                    submission.id,
                    submission.result.as_str(),
                    submission.request_date.to_rfc3339()
                ));
            }
            Ok(lines.join("\n"))
        }
        Commands::Pending => {
            let dumps = manager.pending_dumps().await;
            Ok(render_dumps(&dumps))
        }
        Commands::Submitted => {
            let dumps = manager.submitted_dumps().await;
            Ok(render_dumps(&dumps))
        }
        Commands::Maintenance => {
            manager.run_maintenance().await;
            Ok("Maintenance pass complete".to_string())
        }
    }
}

fn render_dumps(dumps: &[DumpEntry]) -> String {
    if dumps.is_empty() {
        return "No dumps found".to_string();
    }
    dumps
        .iter()
        .map(|dump| format!("{}  {}", dump.date.to_rfc3339(), dump.id))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build logging configuration from CLI arguments
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let mut config = LoggingConfig::default();
    // Quiet by default so command output stays machine-readable.
    config.level = "off".to_string();

    if cli.verbose {
        config.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }

    config
}
