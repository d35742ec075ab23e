//! Command-line entry point: wire a config file and a state file on disk
//! to `prompter-core`'s orchestration engine.
//!
//! Deliberately thin: every decision about *how* to run tasks lives in
//! `prompter-core`; this binary only resolves CLI flags, sets up
//! logging, picks a `ProgressSink`, and reports the final exit code.

mod config;
mod progress;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use tokio_util::sync::CancellationToken;

use prompter_core::{ClaudeCodeAdapter, StateStore};

#[derive(Parser)]
#[command(name = "prompter", about = "Task-graph orchestrator for an AI coding assistant")]
struct Cli {
    /// Path to the TOML configuration file. Required unless
    /// `--completions` is given.
    config: Option<PathBuf>,

    /// Print a shell completion script for the given shell and exit.
    #[arg(long, value_enum)]
    completions: Option<Shell>,

    /// Validate the configuration and print the execution order without
    /// running anything.
    #[arg(long)]
    dry_run: bool,

    /// Run a single named task instead of the full configuration.
    #[arg(long)]
    task: Option<String>,

    /// Print the current state file's summary and exit.
    #[arg(long)]
    status: bool,

    /// Delete the state file and exit.
    #[arg(long)]
    clear_state: bool,

    /// Verbose logging (info-level and above, including per-task detail).
    #[arg(short, long)]
    verbose: bool,

    /// Debug logging (trace-level).
    #[arg(long)]
    debug: bool,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Force simple, non-structured progress lines.
    #[arg(long)]
    simple_progress: bool,

    /// Suppress all progress output.
    #[arg(long)]
    no_progress: bool,
}

fn init_logging(cli: &Cli) -> Result<()> {
    let default_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        clap_complete::generate(shell, &mut Cli::command(), "prompter", &mut std::io::stdout());
        return Ok(());
    }

    init_logging(&cli)?;

    if let Some(timeout) = config::wizard_timeout() {
        tracing::debug!(?timeout, "PROMPTER_WIZARD_TIMEOUT set; no wizard implemented yet");
    }

    let state_path = config::state_path();

    if cli.clear_state {
        StateStore::clear(&state_path).context("failed to clear state file")?;
        println!("cleared {}", state_path.display());
        return Ok(());
    }

    if cli.status {
        return print_status(&state_path).await;
    }

    let Some(config_path) = cli.config.as_deref() else {
        eprintln!("error: a configuration path is required unless --completions is given");
        std::process::exit(2);
    };

    let validated = match config::load_validated(config_path) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    };

    if cli.dry_run {
        println!("configuration OK: {} task(s)", validated.tasks().count());
        println!("execution order:");
        for name in validated.order() {
            println!("  - {name}");
        }
        return Ok(());
    }

    let mode = progress::resolve_mode(
        validated.settings.progress_mode,
        cli.simple_progress,
        cli.no_progress,
    );
    let sink = progress::sink_for(mode);

    let working_dir = std::env::current_dir().context("failed to read current working directory")?;
    let session_id = uuid::Uuid::new_v4().to_string();
    let state = Arc::new(
        StateStore::load(&state_path, session_id)
            .await
            .context("failed to load state file")?,
    );
    state.snapshot().await.warn_on_unknown_tasks(
        &validated.tasks().map(|t| t.name.clone()).collect::<Vec<_>>(),
    );

    let ai: Arc<dyn prompter_core::AiSession> = Arc::new(ClaudeCodeAdapter::new());
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let run_result = if let Some(task_name) = &cli.task {
        run_single_task(&validated, ai, state.clone(), &working_dir, sink, &cancel, task_name).await
    } else {
        prompter_core::run(&validated, ai, state.clone(), working_dir, sink, &cancel).await
    };

    if let Err(e) = run_result {
        eprintln!("{e:#}");
        std::process::exit(1);
    }

    let summary = state.snapshot().await.summarize();
    println!(
        "finished: {} completed, {} failed, {} skipped ({} task(s) total)",
        summary.completed, summary.failed, summary.skipped, summary.total_tasks
    );

    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Run exactly one named task through the executor, bypassing both
/// schedulers -- `--task` is an escape hatch for re-running a single
/// step, not a way to select a sub-DAG.
async fn run_single_task(
    config: &prompter_core::ValidatedConfig,
    ai: Arc<dyn prompter_core::AiSession>,
    state: Arc<StateStore>,
    working_dir: &std::path::Path,
    progress: Arc<dyn prompter_core::ProgressSink>,
    cancel: &CancellationToken,
    task_name: &str,
) -> Result<()> {
    let task = config
        .task(task_name)
        .with_context(|| format!("no task named '{task_name}' in this configuration"))?
        .clone();
    let executor = prompter_core::TaskExecutor::new(
        ai,
        state,
        std::time::Duration::from_secs(config.settings.check_interval),
        working_dir,
        progress,
    );
    executor
        .execute(&task, cancel)
        .await
        .map(|_outcome| ())
        .map_err(Into::into)
}

async fn print_status(state_path: &std::path::Path) -> Result<()> {
    let state = StateStore::load(state_path, "status").await.context("failed to read state file")?;
    let record = state.snapshot().await;
    if record.tasks.is_empty() {
        println!("no recorded run at {}", state_path.display());
        return Ok(());
    }
    let summary = record.summarize();
    println!("session {}", summary.session_id);
    println!(
        "{} completed, {} failed, {} skipped, {} total attempts, {} task(s)",
        summary.completed, summary.failed, summary.skipped, summary.total_attempts, summary.total_tasks
    );
    let mut names: Vec<&String> = record.tasks.keys().collect();
    names.sort();
    for name in names {
        let task = &record.tasks[name];
        let error_suffix = task
            .last_error
            .as_deref()
            .map(|e| format!(" ({e})"))
            .unwrap_or_default();
        println!("  {name}: {}{error_suffix}", task.status);
    }
    Ok(())
}

/// Ctrl+C cancels gracefully; a second Ctrl+C force-exits.
fn spawn_signal_handler(cancel: CancellationToken) {
    let got_first_signal = Arc::new(AtomicBool::new(false));
    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_signal.swap(true, Ordering::SeqCst) {
                eprintln!("\nforce exit");
                std::process::exit(130);
            }
            eprintln!("\nshutting down gracefully (Ctrl+C again to force)...");
            cancel.cancel();
        }
    });
}
