//! Task Executor: drive one task through AI invocation, verification, and
//! retry/flow-control to a terminal per-task outcome.
//!
//! Owns the entire per-task attempt loop, including the `retry` reserved
//! word: a task configured `on_failure = "retry"` is retried here and
//! never surfaces a caller-visible `Retry` directive. The Sequential
//! Runner and Parallel Coordinator only ever see one of the terminal
//! `FlowDirective` variants below.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::ai::{AiRequest, AiSession};
use crate::config::TaskConfig;
use crate::error::{PrompterError, VerifyOutcome};
use crate::progress::{self, ProgressEvent, ProgressSink};
use crate::state::{StateStore, TaskStateUpdate, TaskStatus};
use crate::verifier;

/// Hard ceiling on attempts for a single task within one run, independent
/// of `max_attempts`/`allow_infinite_loops` -- a backstop against a
/// misconfigured `repeat` loop: no task runs an unbounded number of times
/// even with `allow_infinite_loops = true`.
const HARD_DISPATCH_CEILING: u32 = 1000;

/// Timeout applied to a verify command when the task sets no `timeout` --
/// verification is expected to be fast; a hung verify command is itself a
/// failure, not an infrastructure hang.
const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(300);

/// What the caller (Sequential Runner or Parallel Coordinator) should do
/// once this task has reached a terminal outcome for the current
/// dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowDirective {
    /// Proceed as the scheduler normally would: next declared task in the
    /// Sequential Runner, or mark dependents ready in the Coordinator.
    Next,
    /// Halt the run.
    Stop,
    /// Unconditionally rerun this same task (the `repeat` reserved word).
    Repeat,
    /// Jump to the named task.
    Goto(String),
}

impl FlowDirective {
    /// `word_or_task` is never `"retry"`: the executor resolves that
    /// reserved word internally before a directive is produced.
    fn resolve(word_or_task: &str) -> Self {
        match word_or_task {
            "next" => FlowDirective::Next,
            "stop" => FlowDirective::Stop,
            "repeat" => FlowDirective::Repeat,
            other => FlowDirective::Goto(other.to_string()),
        }
    }
}

/// Terminal result of dispatching one task through its full attempt loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub directive: FlowDirective,
}

/// Drives a single task's prompt -> verify -> retry loop.
///
/// Stateless across tasks: one `TaskExecutor` instance serves every task
/// in a run, since all per-task configuration arrives via `execute`'s
/// `task` argument.
pub struct TaskExecutor {
    ai: Arc<dyn AiSession>,
    state: Arc<StateStore>,
    check_interval: Duration,
    working_dir: std::path::PathBuf,
    progress: Arc<dyn ProgressSink>,
}

impl TaskExecutor {
    pub fn new(
        ai: Arc<dyn AiSession>,
        state: Arc<StateStore>,
        check_interval: Duration,
        working_dir: impl Into<std::path::PathBuf>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            ai,
            state,
            check_interval,
            working_dir: working_dir.into(),
            progress,
        }
    }

    /// Convenience constructor for callers that don't care about progress
    /// reporting (most tests).
    pub fn without_progress(
        ai: Arc<dyn AiSession>,
        state: Arc<StateStore>,
        check_interval: Duration,
        working_dir: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self::new(ai, state, check_interval, working_dir, progress::noop())
    }

    /// The sink this executor reports lifecycle events to, for callers
    /// (e.g. the Parallel Coordinator) that need to report events of
    /// their own through the same sink.
    pub fn progress_sink(&self) -> &Arc<dyn ProgressSink> {
        &self.progress
    }

    /// Run `task` through as many attempts as its flow rules call for,
    /// persisting state after each attempt, and return the directive the
    /// caller should follow next.
    pub async fn execute(
        &self,
        task: &TaskConfig,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, PrompterError> {
        let execution_count = self
            .state
            .get(&task.name)
            .await
            .map(|s| s.execution_count)
            .unwrap_or(0)
            + 1;

        let mut dispatches = 0u32;
        loop {
            dispatches += 1;
            if dispatches > HARD_DISPATCH_CEILING {
                return Err(PrompterError::RunawayLoop {
                    task: task.name.clone(),
                    dispatches,
                });
            }

            // Re-read on every attempt (not hoisted like `execution_count`
            // above): a `retry` attempt should resume the session the
            // immediately preceding attempt just opened, which is also the
            // most recently updated terminal session at that point.
            let resume_session_id = if task.resume_previous_session {
                self.state
                    .most_recent_session_id(|_, s| s.status.is_terminal())
                    .await
            } else {
                None
            };

            self.state
                .update(
                    &task.name,
                    TaskStateUpdate {
                        status: Some(TaskStatus::Running),
                        started_at: Some(Some(chrono::Utc::now())),
                        execution_count: Some(execution_count),
                        ..Default::default()
                    },
                )
                .await?;

            if dispatches == 1 {
                self.progress.report(ProgressEvent::Started {
                    task: &task.name,
                    attempt: execution_count,
                });
            } else {
                self.progress.report(ProgressEvent::Retrying {
                    task: &task.name,
                    attempt: execution_count,
                });
            }

            let request = AiRequest {
                prompt: task.prompt.clone(),
                system_prompt: task.system_prompt.clone(),
                timeout: task.timeout_duration(),
                resume_session_id,
                working_dir: self.working_dir.clone(),
            };

            let ai_result = self.ai.run(&request, cancel).await;

            let (verify_outcome, session_id) = match ai_result {
                Ok(reply) => {
                    tokio::time::sleep(self.check_interval).await;
                    let verify_timeout = task.timeout_duration().unwrap_or(DEFAULT_VERIFY_TIMEOUT);
                    let outcome = verifier::verify(
                        &task.verify_command,
                        task.verify_success_code,
                        &self.working_dir,
                        verify_timeout,
                    )
                    .await;
                    (outcome, Some(reply.session_id))
                }
                Err(ai_error) => (
                    VerifyOutcome::Failure {
                        detail: format!("AI session error: {ai_error}"),
                    },
                    None,
                ),
            };

            let success = verify_outcome.is_success();
            let detail = match verify_outcome {
                VerifyOutcome::Success => None,
                VerifyOutcome::Failure { detail } => Some(detail),
            };

            self.state
                .mark_attempt(&task.name, success, detail, session_id)
                .await?;

            if success {
                self.progress.report(ProgressEvent::Completed { task: &task.name });
                return Ok(TaskOutcome {
                    status: TaskStatus::Completed,
                    directive: FlowDirective::resolve(&task.on_success),
                });
            }

            let failure_detail = detail.as_deref().unwrap_or("verification failed");

            if task.on_failure == "retry" {
                let attempts = self
                    .state
                    .get(&task.name)
                    .await
                    .map(|s| s.attempts)
                    .unwrap_or(0);
                if attempts < task.max_attempts {
                    continue;
                }
                // Retries exhausted: treated the same as an explicit stop
                // rather than silently proceeding.
                self.progress.report(ProgressEvent::Failed {
                    task: &task.name,
                    detail: failure_detail,
                });
                return Ok(TaskOutcome {
                    status: TaskStatus::Failed,
                    directive: FlowDirective::Stop,
                });
            }

            self.progress.report(ProgressEvent::Failed {
                task: &task.name,
                detail: failure_detail,
            });
            return Ok(TaskOutcome {
                status: TaskStatus::Failed,
                directive: FlowDirective::resolve(&task.on_failure),
            });
        }
    }
}
