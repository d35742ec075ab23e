//! Core orchestration engine: task graph, config validation, the AI
//! Session Adapter, the Verifier, and the two schedulers (Sequential
//! Runner, Parallel Coordinator) that drive a declarative task list
//! through an AI coding assistant.
//!
//! This crate owns no terminal UI and reads no environment variables --
//! both are the CLI crate's job.

pub mod ai;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod graph;
pub mod progress;
pub mod resource_pool;
pub mod sequential;
pub mod state;
pub mod verifier;

pub use ai::{AiReply, AiRequest, AiSession};
pub use config::{ProgressMode, PrompterConfig, RunSettingsConfig, TaskConfig, ValidatedConfig};
pub use coordinator::ParallelCoordinator;
pub use error::{AiError, ConfigError, ConfigViolation, PrompterError, StateError, VerifyOutcome};
pub use executor::{FlowDirective, TaskExecutor, TaskOutcome};
pub use graph::TaskGraph;
pub use progress::{noop as noop_progress_sink, NoopProgressSink, ProgressEvent, ProgressSink};
pub use resource_pool::ResourcePool;
pub use sequential::SequentialRunner;
pub use state::{RunRecord, RunSummary, StateStore, TaskState, TaskStateUpdate, TaskStatus};

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Run `config` to completion using whichever scheduler
/// `ValidatedConfig::use_parallel_coordinator` selects, against the
/// given `StateStore` and `AiSession`.
///
/// This is the orchestration engine's single public entry point; the CLI
/// crate wires up the concrete `AiSession` (`ai::ClaudeCodeAdapter`),
/// loads/validates the config, and calls this.
pub async fn run(
    config: &ValidatedConfig,
    ai: Arc<dyn AiSession>,
    state: Arc<StateStore>,
    working_dir: impl Into<PathBuf>,
    progress: Arc<dyn ProgressSink>,
    cancel: &CancellationToken,
) -> Result<(), PrompterError> {
    let executor = Arc::new(TaskExecutor::new(
        ai,
        state.clone(),
        std::time::Duration::from_secs(config.settings.check_interval),
        working_dir,
        progress,
    ));

    if config.use_parallel_coordinator() {
        ParallelCoordinator::new(executor, state)
            .run(config, cancel)
            .await
    } else {
        SequentialRunner::new(executor, state).run(config, cancel).await
    }
}
