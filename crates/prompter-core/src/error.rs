//! Error types for the orchestrator core.
//!
//! `ConfigError` and `StateError` are the two error kinds that can surface
//! before or after a run entirely; `AiError` and `VerifyOutcome` are
//! per-attempt outcomes routed through the Task Executor's flow rules
//! (never propagated as a fatal error on their own).

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// One offending task or setting found while validating a configuration.
///
/// `task` is `None` for settings-level violations (e.g. `max_parallel_tasks
/// = 0`) and `Some(name)` for a violation scoped to a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigViolation {
    pub task: Option<String>,
    pub message: String,
}

impl ConfigViolation {
    pub fn task(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task: Some(name.into()),
            message: message.into(),
        }
    }

    pub fn global(message: impl Into<String>) -> Self {
        Self {
            task: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.task {
            Some(task) => write!(f, "task {task:?}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Structural or validation problems in a configuration.
///
/// Enumerates every offending task in one value instead of stopping at the
/// first (spec requires validation errors to report all offenders).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub Vec<ConfigViolation>);

impl ConfigError {
    pub fn single(violation: ConfigViolation) -> Self {
        Self(vec![violation])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration ({} issue(s)):", self.0.len())?;
        for violation in &self.0 {
            write!(f, "\n  - {violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

/// Malformed or unreadable state file.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to persist state file {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced by the AI Session Adapter.
///
/// Recoverable within the Executor's retry loop; never crosses the
/// Coordinator boundary on its own.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AiError {
    #[error("AI session timed out")]
    TimeoutExceeded,
    #[error("AI session cancelled")]
    Cancelled,
    #[error("AI transport error: {0}")]
    TransportError(String),
}

/// Outcome of a single Verifier invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Success,
    Failure { detail: String },
}

impl VerifyOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, VerifyOutcome::Success)
    }
}

/// Errors that invalidate an entire run and terminate it.
///
/// `DependencyFailed` and `LoopProtectionTripped` are deliberately absent:
/// both are represented as a `TaskStatus::Skipped` transition plus a
/// `tracing::warn!`, not a distinct error type.
#[derive(Debug, Error)]
pub enum PrompterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("task {task:?} exceeded the runaway-loop ceiling after {dispatches} dispatches")]
    RunawayLoop { task: String, dispatches: u32 },

    #[error(
        "deadlock detected: {pending:?} have no path to READY and no workers are in flight"
    )]
    DeadlockDetected { pending: Vec<String> },
}

pub type Result<T> = std::result::Result<T, PrompterError>;
