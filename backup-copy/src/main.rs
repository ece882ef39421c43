//! Backup Copy - Main entry point
//!
//! Runs every due backup job once and exits with the run's status.

use anyhow::Context;
use backup_copy::context::{RunContext, RunMode};
use backup_copy::notify::{LogNotifier, Notifiers, WebhookNotifier};
use backup_copy::orchestrator::Orchestrator;
use backup_copy::transfer::{LocalCopyTool, RcloneTool, TransferTool};
use backup_copy::{shutdown, utils, AppConfig};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Copy every job into this local directory instead of its configured
    /// destination (schedules and transfer flags are ignored)
    #[arg(value_name = "DESTINATION")]
    destination: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Compute selections and sizes without transferring anything
    #[arg(long, conflicts_with = "destination")]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("backup-copy: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<u8> {
    // Load configuration
    let config = AppConfig::from_file(&args.config)
        .with_context(|| format!("invalid configuration in {}", args.config.display()))?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level, config.log.file.as_deref())?;

    let mode = if args.dry_run {
        RunMode::Analysis
    } else if let Some(root) = args.destination {
        RunMode::LocalPath(root)
    } else {
        RunMode::Remote
    };

    tracing::info!(
        "Starting backup-copy v{} ({} mode, {} jobs)",
        env!("CARGO_PKG_VERSION"),
        mode,
        config.jobs.len()
    );

    let tool: Box<dyn TransferTool> = match &mode {
        RunMode::LocalPath(root) => Box::new(LocalCopyTool::new(root)),
        RunMode::Remote | RunMode::Analysis => Box::new(RcloneTool::new()),
    };

    let mut notifiers = Notifiers::new().with(LogNotifier::new(&config.notify.subject));
    if let Some(url) = &config.notify.webhook_url {
        notifiers = notifiers.with(WebhookNotifier::new(url, &config.notify.subject)?);
    }

    let cancel = shutdown::install();
    let ctx = RunContext::new(mode, &config, Local::now());
    let summary = Orchestrator::new(tool.as_ref(), &notifiers, cancel).run(&ctx).await;

    Ok(summary.exit_code)
}
