//! Claude Code AI Session Adapter.
//!
//! Spawns `claude -p --output-format stream-json --verbose`, reads
//! newline-delimited JSON events from stdout, and maps them to
//! `(collected_text, session_id)`. Tracks the `session_id` every
//! stream-json event carries and supports `--resume` as a first-class
//! contract, since session resumption is required.

use std::io::Write as _;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AiError;

use super::{AiReply, AiRequest, AiSession};

/// Per-attempt failure, distinguished from `AiError` so `run` can decide
/// whether an `ImmediateExit` warrants the documented `--resume` fallback.
enum AttemptError {
    Cancelled,
    /// The process exited nonzero before emitting a single parseable
    /// event -- the signature of `--resume` failing to find a session.
    ImmediateExit(String),
    Transport(String),
}

impl From<AttemptError> for AiError {
    fn from(e: AttemptError) -> Self {
        match e {
            AttemptError::Cancelled => AiError::Cancelled,
            AttemptError::ImmediateExit(msg) | AttemptError::Transport(msg) => {
                AiError::TransportError(msg)
            }
        }
    }
}

/// Adapter for [Claude Code](https://docs.anthropic.com/en/docs/claude-code).
#[derive(Clone)]
pub struct ClaudeCodeAdapter {
    claude_binary_path: String,
    kill_grace_period: Duration,
}

impl ClaudeCodeAdapter {
    /// Create a new adapter that will look for `claude` on `$PATH`.
    pub fn new() -> Self {
        Self {
            claude_binary_path: "claude".to_string(),
            kill_grace_period: Duration::from_secs(5),
        }
    }

    /// Create a new adapter with a custom binary path. Useful for testing
    /// or when `claude` is installed in a non-standard location.
    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            claude_binary_path: path.into(),
            ..Self::new()
        }
    }

    fn build_command(&self, request: &AiRequest, resume_id: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.claude_binary_path);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose");
        if let Some(system_prompt) = &request.system_prompt {
            cmd.arg("--append-system-prompt").arg(system_prompt);
        }
        if let Some(id) = resume_id {
            cmd.arg("--resume").arg(id);
        }
        cmd.current_dir(&request.working_dir);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd
    }

    async fn run_attempt(
        &self,
        request: &AiRequest,
        resume_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AiReply, AttemptError> {
        let mut cmd = self.build_command(request, resume_id);
        let mut child = cmd.spawn().map_err(|e| {
            AttemptError::Transport(format!(
                "failed to spawn '{}': {e}",
                self.claude_binary_path
            ))
        })?;

        // The prompt is delivered over stdin rather than as a positional
        // argument, so arbitrarily long prompts never hit an argv limit.
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = request.prompt.clone();
            tokio::task::spawn_blocking(move || stdin.write_all(prompt.as_bytes()))
                .await
                .ok();
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AttemptError::Transport("no stdout pipe from claude".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let mut collected_text = String::new();
        let mut session_id: Option<String> = None;
        let mut saw_any_event = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.kill_child(&mut child).await;
                    return Err(AttemptError::Cancelled);
                }
                next_line = lines.next_line() => {
                    match next_line {
                        Ok(Some(line)) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            match parse_line(trimmed) {
                                Ok(parsed) => {
                                    saw_any_event = true;
                                    if let Some(sid) = parsed.session_id {
                                        session_id = Some(sid);
                                    }
                                    if let Some(text) = parsed.text {
                                        if !collected_text.is_empty() {
                                            collected_text.push('\n');
                                        }
                                        collected_text.push_str(&text);
                                    }
                                    if let Some(message) = parsed.error_message {
                                        debug!(message, "claude reported an error event");
                                    }
                                }
                                Err(e) => {
                                    warn!(line = trimmed, error = %e, "skipping malformed JSONL line from claude");
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            return Err(AttemptError::Transport(format!(
                                "stdout read error: {e}"
                            )));
                        }
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| AttemptError::Transport(format!("failed to wait on claude: {e}")))?;

        let Some(session_id) = session_id else {
            if !status.success() && !saw_any_event {
                return Err(AttemptError::ImmediateExit(format!(
                    "claude exited with {status} before emitting any output"
                )));
            }
            return Err(AttemptError::Transport(
                "claude did not report a session_id before exiting".to_string(),
            ));
        };

        Ok(AiReply {
            collected_text,
            session_id,
            resume_fallback: false,
        })
    }

    /// SIGTERM, then SIGKILL after `kill_grace_period` if the process
    /// hasn't exited.
    async fn kill_child(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: pid is a valid u32 from a child we spawned.
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
            }
        }

        let exited = tokio::time::timeout(self.kill_grace_period, child.wait()).await;
        if exited.is_err() {
            let _ = child.kill().await;
        }
    }
}

impl Default for ClaudeCodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClaudeCodeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeCodeAdapter")
            .field("claude_binary_path", &self.claude_binary_path)
            .finish()
    }
}

#[async_trait]
impl AiSession for ClaudeCodeAdapter {
    fn name(&self) -> &str {
        "claude-code"
    }

    async fn run(
        &self,
        request: &AiRequest,
        cancel: &CancellationToken,
    ) -> Result<AiReply, AiError> {
        let resume_id = request.resume_session_id.as_deref();
        let outcome = if let Some(timeout) = request.timeout {
            match tokio::time::timeout(timeout, self.run_attempt(request, resume_id, cancel)).await
            {
                Ok(result) => result,
                Err(_) => return Err(AiError::TimeoutExceeded),
            }
        } else {
            self.run_attempt(request, resume_id, cancel).await
        };

        match outcome {
            Ok(reply) => Ok(reply),
            Err(AttemptError::ImmediateExit(detail)) if resume_id.is_some() => {
                warn!(
                    detail,
                    "claude --resume exited immediately; falling back to a fresh session"
                );
                let fallback = if let Some(timeout) = request.timeout {
                    match tokio::time::timeout(timeout, self.run_attempt(request, None, cancel))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => return Err(AiError::TimeoutExceeded),
                    }
                } else {
                    self.run_attempt(request, None, cancel).await
                };
                fallback
                    .map(|mut reply| {
                        reply.resume_fallback = true;
                        reply
                    })
                    .map_err(AiError::from)
            }
            Err(e) => Err(e.into()),
        }
    }
}

struct ParsedLine {
    text: Option<String>,
    session_id: Option<String>,
    error_message: Option<String>,
}

/// Parse one JSONL line from Claude Code's stream-json output.
///
/// The core only consumes text content and the session id; it ignores
/// tool-use metadata.
fn parse_line(line: &str) -> Result<ParsedLine, serde_json::Error> {
    let v: serde_json::Value = serde_json::from_str(line)?;
    let session_id = v
        .get("session_id")
        .and_then(|s| s.as_str())
        .map(|s| s.to_string());
    let event_type = v.get("type").and_then(|t| t.as_str()).unwrap_or("");

    let mut text = None;
    match event_type {
        "assistant" => {
            if let Some(blocks) = v
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array())
            {
                let mut buf = String::new();
                for block in blocks {
                    if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                        if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                            buf.push_str(t);
                        }
                    }
                }
                if !buf.is_empty() {
                    text = Some(buf);
                }
            }
        }
        "result" => {
            text = v
                .get("result")
                .and_then(|r| r.as_str())
                .map(|s| s.to_string());
        }
        _ => {}
    }

    let error_message = if event_type == "error" {
        Some(
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .or_else(|| v.get("message").and_then(|m| m.as_str()))
                .unwrap_or("unknown error")
                .to_string(),
        )
    } else {
        None
    };

    Ok(ParsedLine {
        text,
        session_id,
        error_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiRequest;

    fn write_script(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    fn request(working_dir: &std::path::Path) -> AiRequest {
        AiRequest {
            prompt: "do the thing".to_string(),
            system_prompt: None,
            timeout: Some(Duration::from_secs(10)),
            resume_session_id: None,
            working_dir: working_dir.to_path_buf(),
        }
    }

    #[test]
    fn parse_assistant_with_session_id() {
        let line = r#"{"type":"assistant","session_id":"sid-123","message":{"content":[{"type":"text","text":"hello"}]}}"#;
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.session_id.as_deref(), Some("sid-123"));
        assert_eq!(parsed.text.as_deref(), Some("hello"));
    }

    #[test]
    fn parse_result_line() {
        let line = r#"{"type":"result","session_id":"sid-123","result":"done"}"#;
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.text.as_deref(), Some("done"));
    }

    #[test]
    fn parse_error_line() {
        let line = r#"{"type":"error","session_id":"sid-123","error":{"message":"boom"}}"#;
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn parse_malformed_returns_err() {
        assert!(parse_line("not json").is_err());
    }

    #[tokio::test]
    async fn run_collects_text_and_session_id() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(
            tmp.path(),
            "fake_claude.sh",
            "#!/bin/sh\ncat >/dev/null\necho '{\"type\":\"result\",\"session_id\":\"sid-xyz\",\"result\":\"Done.\"}'\n",
        );
        let adapter = ClaudeCodeAdapter::with_binary(script.to_str().unwrap());
        let reply = adapter
            .run(&request(tmp.path()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply.session_id, "sid-xyz");
        assert_eq!(reply.collected_text, "Done.");
        assert!(!reply.resume_fallback);
    }

    #[tokio::test]
    async fn run_skips_malformed_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(
            tmp.path(),
            "fake_claude.sh",
            "#!/bin/sh\ncat >/dev/null\necho 'not json'\necho '{\"type\":\"result\",\"session_id\":\"sid-1\",\"result\":\"ok\"}'\n",
        );
        let adapter = ClaudeCodeAdapter::with_binary(script.to_str().unwrap());
        let reply = adapter
            .run(&request(tmp.path()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply.session_id, "sid-1");
    }

    #[tokio::test]
    async fn run_times_out_and_kills_child() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "slow_claude.sh", "#!/bin/sh\ncat >/dev/null\nsleep 60\n");
        let adapter = ClaudeCodeAdapter::with_binary(script.to_str().unwrap());
        let mut req = request(tmp.path());
        req.timeout = Some(Duration::from_millis(100));
        let result = adapter.run(&req, &CancellationToken::new()).await;
        assert_eq!(result.unwrap_err(), AiError::TimeoutExceeded);
    }

    #[tokio::test]
    async fn run_reports_cancelled() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "slow_claude.sh", "#!/bin/sh\ncat >/dev/null\nsleep 60\n");
        let adapter = ClaudeCodeAdapter::with_binary(script.to_str().unwrap());
        let mut req = request(tmp.path());
        req.timeout = None;
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });
        let result = adapter.run(&req, &cancel).await;
        handle.await.unwrap();
        assert_eq!(result.unwrap_err(), AiError::Cancelled);
    }

    #[tokio::test]
    async fn run_falls_back_when_resume_exits_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        // Script distinguishes --resume (exits nonzero immediately) from a
        // fresh run (succeeds).
        let script = write_script(
            tmp.path(),
            "resume_claude.sh",
            "#!/bin/sh\ncat >/dev/null\nfor arg in \"$@\"; do\n  if [ \"$arg\" = \"--resume\" ]; then\n    exit 1\n  fi\ndone\necho '{\"type\":\"result\",\"session_id\":\"fresh-sid\",\"result\":\"ok\"}'\n",
        );
        let adapter = ClaudeCodeAdapter::with_binary(script.to_str().unwrap());
        let mut req = request(tmp.path());
        req.resume_session_id = Some("stale-sid".to_string());
        let reply = adapter.run(&req, &CancellationToken::new()).await.unwrap();
        assert!(reply.resume_fallback);
        assert_eq!(reply.session_id, "fresh-sid");
    }

    #[tokio::test]
    async fn run_binary_not_found_returns_transport_error() {
        let adapter = ClaudeCodeAdapter::with_binary("/nonexistent/path/to/claude");
        let result = adapter
            .run(&request(std::path::Path::new("/tmp")), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AiError::TransportError(_))));
    }

    #[test]
    fn adapter_name_is_claude_code() {
        assert_eq!(ClaudeCodeAdapter::new().name(), "claude-code");
    }
}
