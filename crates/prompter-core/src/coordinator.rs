//! Parallel Coordinator: dispatch tasks across the DAG concurrently,
//! subject to the Resource Pool and each task's flow directives.
//!
//! A four-phase promote/dispatch/wait/reap loop, generalized from the
//! pack's DAG-scheduler idiom (`other_examples/.../dag_cmd/scheduler.rs`):
//! promote computes newly-ready tasks from the graph, dispatch spawns
//! every schedulable one onto its own task, wait blocks on an mpsc
//! completion channel (or cancellation), and reap folds each completion
//! back into the run's completed/failed/skipped sets.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ValidatedConfig;
use crate::error::PrompterError;
use crate::executor::{FlowDirective, TaskExecutor, TaskOutcome};
use crate::progress::ProgressEvent;
use crate::resource_pool::ResourcePool;
use crate::state::{StateStore, TaskStateUpdate, TaskStatus};

pub struct ParallelCoordinator {
    executor: Arc<TaskExecutor>,
    state: Arc<StateStore>,
}

impl ParallelCoordinator {
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

    /// Run every task in `config` to completion, respecting dependencies,
    /// the Resource Pool, and per-task flow directives. Returns once no
    /// task is running and none is dispatchable: either every task has
    /// reached a terminal status, or a halting `stop` directive fired.
    pub async fn run(
        &self,
        config: &ValidatedConfig,
        cancel: &CancellationToken,
    ) -> Result<(), PrompterError> {
        let pool = Arc::new(Mutex::new(ResourcePool::new(
            config.settings.max_parallel_tasks,
        )));
        let all_names: HashSet<String> = config.graph().task_names().iter().cloned().collect();

        // Seed from any prior run recorded in the state file so a resumed
        // run doesn't redo already-terminal tasks.
        let mut completed: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut skipped: HashSet<String> = HashSet::new();
        for (name, task_state) in self.state.snapshot().await.tasks {
            if !all_names.contains(&name) {
                continue;
            }
            match task_state.status {
                TaskStatus::Completed => {
                    completed.insert(name);
                }
                TaskStatus::Failed => {
                    failed.insert(name);
                }
                TaskStatus::Skipped => {
                    skipped.insert(name);
                }
                _ => {}
            }
        }
        let mut running: HashSet<String> = HashSet::new();
        // Tasks forced to (re)run regardless of dependency state: the
        // `repeat` reserved word and explicit `Goto(name)` jumps.
        let mut forced: VecDeque<String> = VecDeque::new();

        let (tx, mut rx) = mpsc::channel::<(String, Result<TaskOutcome, PrompterError>)>(
            all_names.len().max(1),
        );

        loop {
            // Propagate SKIPPED to every transitive dependent of a newly
            // failed task before considering what else to dispatch --
            // this is what makes `exclusive` moot on a SKIPPED task: a
            // skipped task is filtered out below before the Resource
            // Pool is ever consulted. Runs even on the iteration a `stop`
            // directive cancels the run, so the task that triggered the
            // stop still propagates to its dependents before the loop
            // exits below.
            for name in failed.clone() {
                for dependent in config.graph().transitive_dependents(&name) {
                    if !completed.contains(&dependent)
                        && !failed.contains(&dependent)
                        && skipped.insert(dependent.clone())
                    {
                        self.state
                            .update(
                                &dependent,
                                TaskStateUpdate {
                                    status: Some(TaskStatus::Skipped),
                                    ..Default::default()
                                },
                            )
                            .await?;
                        self.executor
                            .progress_sink()
                            .report(ProgressEvent::Skipped { task: &dependent });
                    }
                }
            }

            if cancel.is_cancelled() {
                break;
            }

            let mut candidates: Vec<String> = config
                .graph()
                .ready(&completed, &failed)
                .into_iter()
                .filter(|n| {
                    !running.contains(n)
                        && !completed.contains(n)
                        && !failed.contains(n)
                        && !skipped.contains(n)
                })
                .collect();
            while let Some(name) = forced.pop_front() {
                if !running.contains(&name) && !skipped.contains(&name) && !candidates.contains(&name) {
                    candidates.push(name);
                }
            }

            for name in candidates {
                let task = match config.task(&name) {
                    Some(task) => task.clone(),
                    None => continue,
                };
                let schedulable = {
                    let pool = pool.lock().await;
                    pool.can_schedule(task.exclusive)
                };
                if !schedulable {
                    continue;
                }
                pool.lock().await.allocate(&name, task.exclusive);
                running.insert(name.clone());

                let executor = self.executor.clone();
                let tx = tx.clone();
                let task_cancel = cancel.clone();
                let task_name = name.clone();
                tokio::spawn(async move {
                    let result = executor.execute(&task, &task_cancel).await;
                    let _ = tx.send((task_name, result)).await;
                });
            }

            if running.is_empty() && forced.is_empty() {
                let pending: Vec<String> = all_names
                    .iter()
                    .filter(|n| {
                        !completed.contains(*n) && !failed.contains(*n) && !skipped.contains(*n)
                    })
                    .cloned()
                    .collect();
                if pending.is_empty() {
                    break;
                }
                return Err(PrompterError::DeadlockDetected { pending });
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                }
                received = rx.recv() => {
                    let Some((name, result)) = received else {
                        break;
                    };
                    running.remove(&name);
                    let exclusive = config.task(&name).map(|t| t.exclusive).unwrap_or(false);
                    pool.lock().await.release(&name, exclusive);

                    let outcome = result?;
                    match &outcome.directive {
                        FlowDirective::Repeat => {
                            if self.self_loop_allowed(config, &name).await {
                                info!(task = %name, "repeat: re-dispatching");
                                forced.push_back(name);
                            } else {
                                warn!(task = %name, "loop protection: refusing to repeat a task that already ran");
                                record_terminal(&outcome, &name, &mut completed, &mut failed);
                            }
                        }
                        FlowDirective::Next => {
                            record_terminal(&outcome, &name, &mut completed, &mut failed);
                        }
                        FlowDirective::Stop => {
                            record_terminal(&outcome, &name, &mut completed, &mut failed);
                            warn!(task = %name, "stop directive: halting run");
                            cancel.cancel();
                        }
                        FlowDirective::Goto(target) => {
                            let target = target.clone();
                            record_terminal(&outcome, &name, &mut completed, &mut failed);
                            if target == name {
                                if self.self_loop_allowed(config, &name).await {
                                    forced.push_back(target);
                                } else {
                                    warn!(task = %name, "loop protection: refusing a self-referential jump");
                                }
                            } else if all_names.contains(&target) {
                                forced.push_back(target);
                            } else {
                                warn!(task = %name, target, "flow rule targets an unknown task; ignoring");
                            }
                        }
                    }
                }
            }
        }

        let summary = self.state.snapshot().await.summarize();
        info!(
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "parallel run finished"
        );

        Ok(())
    }
}

fn record_terminal(
    outcome: &TaskOutcome,
    name: &str,
    completed: &mut HashSet<String>,
    failed: &mut HashSet<String>,
) {
    match outcome.status {
        TaskStatus::Completed => {
            failed.remove(name);
            completed.insert(name.to_string());
        }
        _ => {
            completed.remove(name);
            failed.insert(name.to_string());
        }
    }
}
