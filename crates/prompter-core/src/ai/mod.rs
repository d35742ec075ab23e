//! AI Session Adapter: translate a task's prompt into a (reply text,
//! session id, outcome) triple via a streaming conversation interface.
//!
//! The trait is object-safe (`name`, `run`, a single async call rather
//! than a stream) since this core supports exactly one adapter, not a
//! named registry of interchangeable agent CLIs.

pub mod claude_code;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::AiError;

pub use claude_code::ClaudeCodeAdapter;

/// Inputs to a single AI Session Adapter invocation.
#[derive(Debug, Clone)]
pub struct AiRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub timeout: Option<std::time::Duration>,
    pub resume_session_id: Option<String>,
    pub working_dir: std::path::PathBuf,
}

/// Successful result of an AI Session Adapter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiReply {
    pub collected_text: String,
    pub session_id: String,
    /// Set when a `resume_session_id` was requested but the underlying
    /// interface could not resume it, so a fresh session was used instead
    /// (the caller should warn on this).
    pub resume_fallback: bool,
}

/// Streaming conversation interface to an external AI coding assistant.
///
/// Object-safe: every method returns a concrete type or a future of one,
/// so implementations can be stored as `Box<dyn AiSession>`.
#[async_trait]
pub trait AiSession: Send + Sync {
    /// Human-readable name for this adapter (e.g. "claude-code").
    fn name(&self) -> &str;

    /// Run one AI phase to completion: spawn, stream-consume, and
    /// translate the result. Must consume any asynchronous message stream
    /// to completion on success, and must abort the stream promptly on
    /// timeout, cancellation, or error.
    async fn run(
        &self,
        request: &AiRequest,
        cancel: &CancellationToken,
    ) -> Result<AiReply, AiError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn AiSession) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopSession;

    #[async_trait]
    impl AiSession for NoopSession {
        fn name(&self) -> &str {
            "noop"
        }

        async fn run(
            &self,
            _request: &AiRequest,
            _cancel: &CancellationToken,
        ) -> Result<AiReply, AiError> {
            Ok(AiReply {
                collected_text: String::new(),
                session_id: "noop-session".to_string(),
                resume_fallback: false,
            })
        }
    }

    #[test]
    fn ai_session_is_object_safe() {
        let session: Box<dyn AiSession> = Box::new(NoopSession);
        assert_eq!(session.name(), "noop");
    }

    #[tokio::test]
    async fn noop_session_runs() {
        let session = NoopSession;
        let request = AiRequest {
            prompt: "hi".to_string(),
            system_prompt: None,
            timeout: None,
            resume_session_id: None,
            working_dir: std::path::PathBuf::from("/tmp"),
        };
        let reply = session
            .run(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply.session_id, "noop-session");
    }
}
