//! Sequential Runner: linear, pointer-driven execution for configs with
//! no inter-task dependencies.
//!
//! Used whenever `ValidatedConfig::use_parallel_coordinator()` is false
//! -- either `enable_parallel = false`, or no task declares a
//! `depends_on` at all, in which case running the Parallel Coordinator
//! would just be a single-width version of this loop with extra
//! bookkeeping.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ValidatedConfig;
use crate::error::PrompterError;
use crate::executor::{FlowDirective, TaskExecutor};
use crate::state::{StateStore, TaskStatus};

const HARD_STEP_CEILING: u32 = 1000;

pub struct SequentialRunner {
    executor: Arc<TaskExecutor>,
    state: Arc<StateStore>,
}

impl SequentialRunner {
    pub fn new(executor: Arc<TaskExecutor>, state: Arc<StateStore>) -> Self {
        Self { executor, state }
    }

    /// Whether `name` may be dispatched again via `repeat` or a flow rule
    /// naming itself. `execution_count` already reflects the dispatch
    /// that just completed, so the cap is the number of dispatches
    /// allowed in total, not the number of additional re-dispatches.
    async fn self_loop_allowed(&self, config: &ValidatedConfig, name: &str) -> bool {
        let cap = if config.settings.allow_infinite_loops { 1000 } else { 1 };
        let count = self.state.get(name).await.map(|s| s.execution_count).unwrap_or(0);
        count < cap
    }

    /// Walk `config.order()` from the first task, following each task's
    /// flow directive instead of always advancing -- `Goto`/`Repeat`
    /// move the cursor explicitly, `Stop` ends the run, `Next` advances
    /// to the following declared task (or ends the run, if `name` was
    /// the last one declared).
    pub async fn run(
        &self,
        config: &ValidatedConfig,
        cancel: &CancellationToken,
    ) -> Result<(), PrompterError> {
        let order = config.order();
        if order.is_empty() {
            return Ok(());
        }

        let mut cursor = order[0].clone();
        let mut visited_names: HashSet<String> = HashSet::new();
        let mut steps = 0u32;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            steps += 1;
            if steps > HARD_STEP_CEILING {
                return Err(PrompterError::RunawayLoop {
                    task: cursor,
                    dispatches: steps,
                });
            }

            let Some(task) = config.task(&cursor) else {
                warn!(task = %cursor, "flow rule targets an unknown task; stopping");
                break;
            };
            let task = task.clone();

            // `insert` reports whether `cursor` is new to this run's walk --
            // a `repeat`/self-`goto` revisit later in the same run must
            // still execute even though the task is already COMPLETED.
            let first_visit_this_run = visited_names.insert(cursor.clone());

            // Resumed from a prior state file: an already-completed task is
            // not re-run, so the walk just advances past it.
            if first_visit_this_run
                && self.state.get(&cursor).await.map(|s| s.status) == Some(TaskStatus::Completed)
            {
                match next_in_order(order, &cursor) {
                    Some(next) => {
                        cursor = next;
                        continue;
                    }
                    None => break,
                }
            }

            let outcome = self.executor.execute(&task, cancel).await?;

            match outcome.directive {
                FlowDirective::Stop => break,
                FlowDirective::Repeat => {
                    if self.self_loop_allowed(config, &cursor).await {
                        continue;
                    }
                    warn!(task = %cursor, "loop protection: refusing to repeat a task that already ran");
                    break;
                }
                FlowDirective::Goto(target) => {
                    if target == cursor {
                        if self.self_loop_allowed(config, &cursor).await {
                            continue;
                        }
                        warn!(task = %cursor, "loop protection: refusing a self-referential jump");
                        break;
                    }
                    cursor = target;
                }
                FlowDirective::Next => match next_in_order(order, &cursor) {
                    Some(next) => cursor = next,
                    None => break,
                },
            }
        }

        let summary = self.state.snapshot().await.summarize();
        info!(
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "sequential run finished"
        );

        Ok(())
    }
}

fn next_in_order(order: &[String], current: &str) -> Option<String> {
    let position = order.iter().position(|n| n == current)?;
    order.get(position + 1).cloned()
}
