//! Concrete `ProgressSink` implementations selected by `ProgressMode`.
//!
//! The core never renders anything itself; it only calls the injected
//! sink. This crate is the one place that decides what a task lifecycle
//! event looks like on a terminal -- never a full TUI, just line-oriented
//! output, consistent with `ProgressMode`'s four settings.

use prompter_core::{NoopProgressSink, ProgressEvent, ProgressMode, ProgressSink};

/// One `tracing::info!`/`warn!` line per event. Used for `Auto` and
/// `Rich`, since neither calls for more than structured log lines here.
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn report(&self, event: ProgressEvent<'_>) {
        match event {
            ProgressEvent::Started { task, attempt } => {
                tracing::info!(task, attempt, "started");
            }
            ProgressEvent::Retrying { task, attempt } => {
                tracing::info!(task, attempt, "retrying");
            }
            ProgressEvent::Completed { task } => {
                tracing::info!(task, "completed");
            }
            ProgressEvent::Failed { task, detail } => {
                tracing::warn!(task, detail, "failed");
            }
            ProgressEvent::Skipped { task } => {
                tracing::warn!(task, "skipped");
            }
        }
    }
}

/// One terse `println!` line per event, no log-level prefixes or
/// timestamps. Used for `Simple`.
pub struct SimpleProgressSink;

impl ProgressSink for SimpleProgressSink {
    fn report(&self, event: ProgressEvent<'_>) {
        match event {
            ProgressEvent::Started { task, attempt } => {
                println!("[{task}] attempt {attempt} started");
            }
            ProgressEvent::Retrying { task, attempt } => {
                println!("[{task}] retrying (attempt {attempt})");
            }
            ProgressEvent::Completed { task } => {
                println!("[{task}] completed");
            }
            ProgressEvent::Failed { task, detail } => {
                println!("[{task}] failed: {detail}");
            }
            ProgressEvent::Skipped { task } => {
                println!("[{task}] skipped");
            }
        }
    }
}

/// Resolve the effective `ProgressMode`, letting `--simple-progress` and
/// `--no-progress` override whatever the config file set.
pub fn resolve_mode(configured: ProgressMode, simple: bool, none: bool) -> ProgressMode {
    if none {
        ProgressMode::None
    } else if simple {
        ProgressMode::Simple
    } else {
        configured
    }
}

/// Build the sink for `mode`. `Auto` resolves to the tracing-backed sink
/// here: a real terminal-capability probe is exactly the kind of
/// full-TUI machinery this CLI doesn't carry.
pub fn sink_for(mode: ProgressMode) -> std::sync::Arc<dyn ProgressSink> {
    match mode {
        ProgressMode::Auto | ProgressMode::Rich => std::sync::Arc::new(TracingProgressSink),
        ProgressMode::Simple => std::sync::Arc::new(SimpleProgressSink),
        ProgressMode::None => std::sync::Arc::new(NoopProgressSink),
    }
}
