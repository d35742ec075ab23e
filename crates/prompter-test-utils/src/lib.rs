//! Shared test fixtures for `prompter-core` and `prompter-cli`.
//!
//! `ScriptedSession` is a deterministic, scriptable `AiSession` so
//! integration tests never spawn a real `claude` subprocess.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use prompter_core::{AiError, AiReply, AiRequest, AiSession};
use tokio_util::sync::CancellationToken;

/// One scripted response for a single `AiSession::run` call.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Reply {
        collected_text: String,
        session_id: String,
    },
    Fail(AiError),
}

impl ScriptedStep {
    pub fn ok(session_id: impl Into<String>) -> Self {
        ScriptedStep::Reply {
            collected_text: String::new(),
            session_id: session_id.into(),
        }
    }

    pub fn ok_with_text(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        ScriptedStep::Reply {
            collected_text: text.into(),
            session_id: session_id.into(),
        }
    }

    pub fn transport_error(message: impl Into<String>) -> Self {
        ScriptedStep::Fail(AiError::TransportError(message.into()))
    }
}

/// A deterministic `AiSession`: returns a fixed sequence of `ScriptedStep`s,
/// one per call, repeating the last step forever once the script runs out.
pub struct ScriptedSession {
    steps: Vec<ScriptedStep>,
    calls: AtomicUsize,
    requests_seen: Mutex<Vec<AiRequest>>,
}

impl ScriptedSession {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps,
            calls: AtomicUsize::new(0),
            requests_seen: Mutex::new(Vec::new()),
        }
    }

    /// A session that always succeeds, stamping every reply with
    /// `session_id`.
    pub fn always_succeeds(session_id: impl Into<String>) -> Self {
        Self::new(vec![ScriptedStep::ok(session_id)])
    }

    /// A session that always fails with `message`.
    pub fn always_fails(message: impl Into<String>) -> Self {
        Self::new(vec![ScriptedStep::transport_error(message)])
    }

    /// Every `AiRequest` this session has been asked to run, in order.
    pub fn requests_seen(&self) -> Vec<AiRequest> {
        self.requests_seen.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiSession for ScriptedSession {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(
        &self,
        request: &AiRequest,
        _cancel: &CancellationToken,
    ) -> Result<AiReply, AiError> {
        self.requests_seen.lock().unwrap().push(request.clone());
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .get(index)
            .or_else(|| self.steps.last())
            .cloned()
            .expect("ScriptedSession must be constructed with at least one step");

        match step {
            ScriptedStep::Reply {
                collected_text,
                session_id,
            } => Ok(AiReply {
                collected_text,
                session_id,
                resume_fallback: false,
            }),
            ScriptedStep::Fail(err) => Err(err),
        }
    }
}

/// A temporary working directory that outlives the test, with a helper
/// for writing `verify_command`-friendly marker files.
pub struct TempWorkingDir {
    dir: tempfile::TempDir,
}

impl TempWorkingDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp working dir"),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Write `contents` to `name` inside the working directory, returning
    /// its full path. Handy for building a `verify_command` like
    /// `test -f marker.txt`.
    pub fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("failed to write fixture file");
        path
    }
}

impl Default for TempWorkingDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a minimal valid `[[tasks]]` TOML fragment for a task named
/// `name` with a trivially-true verify command, for tests that only care
/// about flow control, not prompt content.
pub fn minimal_task_toml(name: &str) -> String {
    format!(
        r#"
[[tasks]]
name = "{name}"
prompt = "do {name}"
verify_command = "true"
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AiRequest {
        AiRequest {
            prompt: "hi".to_string(),
            system_prompt: None,
            timeout: None,
            resume_session_id: None,
            working_dir: PathBuf::from("/tmp"),
        }
    }

    #[tokio::test]
    async fn scripted_session_replays_steps_in_order() {
        let session = ScriptedSession::new(vec![
            ScriptedStep::ok("sid-1"),
            ScriptedStep::ok("sid-2"),
        ]);
        let cancel = CancellationToken::new();
        let first = session.run(&request(), &cancel).await.unwrap();
        let second = session.run(&request(), &cancel).await.unwrap();
        assert_eq!(first.session_id, "sid-1");
        assert_eq!(second.session_id, "sid-2");
        assert_eq!(session.call_count(), 2);
    }

    #[tokio::test]
    async fn scripted_session_repeats_last_step() {
        let session = ScriptedSession::always_succeeds("sid-only");
        let cancel = CancellationToken::new();
        session.run(&request(), &cancel).await.unwrap();
        let third = session.run(&request(), &cancel).await.unwrap();
        assert_eq!(third.session_id, "sid-only");
    }

    #[tokio::test]
    async fn scripted_session_records_requests() {
        let session = ScriptedSession::always_succeeds("sid");
        let cancel = CancellationToken::new();
        session.run(&request(), &cancel).await.unwrap();
        assert_eq!(session.requests_seen().len(), 1);
        assert_eq!(session.requests_seen()[0].prompt, "hi");
    }

    #[test]
    fn temp_working_dir_write_file_round_trips() {
        let dir = TempWorkingDir::new();
        let path = dir.write_file("marker.txt", "ok");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "ok");
    }
}
