//! Progress reporting seam: the core emits lifecycle events through an
//! injected `ProgressSink`, but never renders a terminal UI itself --
//! that stays entirely in the CLI crate. Rendering is out of scope here,
//! not the event stream.

use std::sync::Arc;

/// One task lifecycle event, reported as it happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent<'a> {
    Started { task: &'a str, attempt: u32 },
    Completed { task: &'a str },
    Failed { task: &'a str, detail: &'a str },
    Skipped { task: &'a str },
    Retrying { task: &'a str, attempt: u32 },
}

/// Sink for task lifecycle events. Implementations must not block the
/// caller for long -- they run inline on the scheduling loop.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent<'_>);
}

/// Discards every event. The default when no sink is supplied.
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn report(&self, _event: ProgressEvent<'_>) {}
}

/// Convenience: an `Arc<dyn ProgressSink>` pointing at `NoopProgressSink`.
pub fn noop() -> Arc<dyn ProgressSink> {
    Arc::new(NoopProgressSink)
}

const _: () = {
    fn _assert_object_safe(_: &dyn ProgressSink) {}
};
