//! Integration-level coverage for the cross-cutting invariants that don't
//! fit neatly inside a single module's unit tests: acyclicity is already
//! exhaustively covered in `graph.rs`, so it isn't repeated here.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use prompter_core::{
    config, noop_progress_sink, AiError, AiReply, AiRequest, AiSession, StateStore, TaskStatus,
};
use prompter_test_utils::{ScriptedSession, ScriptedStep, TempWorkingDir};

async fn run_to_completion(toml_str: &str, ai: Arc<dyn AiSession>, dir: &TempWorkingDir) -> Arc<StateStore> {
    let validated = config::load_str(toml_str).expect("config should validate");
    let state = Arc::new(
        StateStore::load(dir.path().join("state.json"), "s1")
            .await
            .expect("state should load"),
    );
    prompter_core::run(
        &validated,
        ai,
        state.clone(),
        dir.path(),
        noop_progress_sink(),
        &CancellationToken::new(),
    )
    .await
    .expect("run should not error");
    state
}

/// Invariant: a task never starts before every dependency it declares has
/// reached COMPLETED.
struct TimestampedSession {
    starts: Mutex<Vec<(String, Instant)>>,
}

impl TimestampedSession {
    fn new() -> Self {
        Self {
            starts: Mutex::new(Vec::new()),
        }
    }

    async fn start_time_of(&self, prompt: &str) -> Instant {
        self.starts
            .lock()
            .await
            .iter()
            .find(|(p, _)| p == prompt)
            .map(|(_, t)| *t)
            .expect("prompt should have been dispatched")
    }
}

#[async_trait]
impl AiSession for TimestampedSession {
    fn name(&self) -> &str {
        "timestamped"
    }

    async fn run(&self, request: &AiRequest, _cancel: &CancellationToken) -> Result<AiReply, AiError> {
        self.starts
            .lock()
            .await
            .push((request.prompt.clone(), Instant::now()));
        if request.prompt == "a" {
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        Ok(AiReply {
            collected_text: String::new(),
            session_id: "sid".to_string(),
            resume_fallback: false,
        })
    }
}

#[tokio::test]
async fn dependency_gate_blocks_start_until_dependency_completes() {
    let dir = TempWorkingDir::new();
    let toml_str = r#"
[[tasks]]
name = "a"
prompt = "a"
verify_command = "true"

[[tasks]]
name = "b"
prompt = "b"
verify_command = "true"
depends_on = ["a"]
"#;
    let ai = Arc::new(TimestampedSession::new());
    run_to_completion(toml_str, ai.clone(), &dir).await;

    let a_start = ai.start_time_of("a").await;
    let b_start = ai.start_time_of("b").await;
    assert!(
        b_start >= a_start + Duration::from_millis(55),
        "\"b\" started before \"a\" had time to finish"
    );
}

/// Invariant: the Resource Pool's `max_parallel_tasks` is an upper bound,
/// never a target -- a config with `max_parallel_tasks = 1` runs every
/// independent task strictly one at a time.
struct SerializingSession {
    current: AtomicUsize,
    max_seen: AtomicUsize,
}

#[async_trait]
impl AiSession for SerializingSession {
    fn name(&self) -> &str {
        "serializing"
    }

    async fn run(&self, _request: &AiRequest, _cancel: &CancellationToken) -> Result<AiReply, AiError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(AiReply {
            collected_text: String::new(),
            session_id: "sid".to_string(),
            resume_fallback: false,
        })
    }
}

#[tokio::test]
async fn max_parallel_tasks_of_one_runs_strictly_serially() {
    let dir = TempWorkingDir::new();
    let toml_str = r#"
[settings]
max_parallel_tasks = 1

[[tasks]]
name = "a"
prompt = "a"
verify_command = "true"

[[tasks]]
name = "b"
prompt = "b"
verify_command = "true"

[[tasks]]
name = "c"
prompt = "c"
verify_command = "true"
"#;
    let ai = Arc::new(SerializingSession {
        current: AtomicUsize::new(0),
        max_seen: AtomicUsize::new(0),
    });
    let validated = config::load_str(toml_str).unwrap();
    let state = Arc::new(
        StateStore::load(dir.path().join("state.json"), "s1")
            .await
            .unwrap(),
    );
    let executor = Arc::new(prompter_core::TaskExecutor::without_progress(
        ai.clone(),
        state.clone(),
        Duration::from_millis(1),
        dir.path(),
    ));
    prompter_core::ParallelCoordinator::new(executor, state.clone())
        .run(&validated, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ai.max_seen.load(Ordering::SeqCst), 1);
}

/// Invariant: `on_failure = "stop"` acts on the first failed attempt
/// regardless of `max_attempts`, unlike `on_failure = "retry"`.
#[tokio::test]
async fn on_failure_stop_does_not_consume_max_attempts() {
    let dir = TempWorkingDir::new();
    let toml_str = r#"
[[tasks]]
name = "a"
prompt = "a"
verify_command = "false"
on_failure = "stop"
max_attempts = 5
"#;
    let ai = Arc::new(ScriptedSession::always_succeeds("sid"));
    let state = run_to_completion(toml_str, ai.clone(), &dir).await;

    assert_eq!(ai.call_count(), 1, "stop must act after the first attempt");
    let snapshot = state.snapshot().await;
    assert_eq!(snapshot.tasks["a"].attempts, 1);
    assert_eq!(snapshot.tasks["a"].status, TaskStatus::Failed);
}

/// Invariant: the state file is never left truncated or mid-write --
/// every `persist` goes through a `.json.tmp` + rename, so no stray temp
/// file should survive a normal run.
#[tokio::test]
async fn state_file_has_no_leftover_temp_file_after_a_run() {
    let dir = TempWorkingDir::new();
    let toml_str = r#"
[[tasks]]
name = "a"
prompt = "a"
verify_command = "true"
"#;
    let ai = Arc::new(ScriptedSession::always_succeeds("sid"));
    run_to_completion(toml_str, ai, &dir).await;

    let state_path = dir.path().join("state.json");
    assert!(state_path.exists());
    assert!(!state_path.with_extension("json.tmp").exists());
}

/// Invariant: loop protection only gates a task's flow rule naming
/// itself; `allow_infinite_loops = true` raises the cap enough that a
/// bounded self-repeat (until the AI itself fails) completes normally
/// rather than being cut off at the default cap of one.
#[tokio::test]
async fn allow_infinite_loops_permits_more_than_one_self_repeat() {
    let dir = TempWorkingDir::new();
    let toml_str = r#"
[settings]
allow_infinite_loops = true

[[tasks]]
name = "a"
prompt = "a"
verify_command = "true"
on_success = "repeat"
"#;
    let ai = Arc::new(ScriptedSession::new(vec![
        ScriptedStep::ok("sid"),
        ScriptedStep::ok("sid"),
        ScriptedStep::ok("sid"),
        ScriptedStep::transport_error("out of budget"),
    ]));
    let state = run_to_completion(toml_str, ai.clone(), &dir).await;

    assert_eq!(ai.call_count(), 4);
    let snapshot = state.snapshot().await;
    assert_eq!(snapshot.tasks["a"].status, TaskStatus::Failed);
    assert_eq!(snapshot.tasks["a"].execution_count, 4);
}

/// Invariant: session resumption threads the immediately preceding
/// attempt's `session_id` into the next attempt when `resume_previous_session`
/// is set, including across internal `retry` attempts.
#[tokio::test]
async fn resume_previous_session_carries_session_id_across_retries() {
    let dir = TempWorkingDir::new();
    let toml_str = r#"
[[tasks]]
name = "a"
prompt = "a"
verify_command = "false"
on_failure = "retry"
max_attempts = 2
resume_previous_session = true
"#;
    let ai = Arc::new(ScriptedSession::new(vec![
        ScriptedStep::ok("sid-1"),
        ScriptedStep::ok("sid-2"),
    ]));
    run_to_completion(toml_str, ai.clone(), &dir).await;

    let requests = ai.requests_seen();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].resume_session_id, None);
    assert_eq!(requests[1].resume_session_id.as_deref(), Some("sid-1"));
}
