//! The handler contract every queue implements.

use std::sync::Arc;

use job_common::progress::ProgressTracker;
use job_common::JobId;
use object_store::ObjectStore;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

/// What a handler's `Execute` call can report back to the dispatcher.
/// `Success`/`RetryableFailure`/`TerminalFailure` map directly onto the
/// error taxonomy; a payload that fails to deserialize should map to
/// `TerminalFailure` rather than be retried.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    Success,
    RetryableFailure { reason: String },
    TerminalFailure { reason: String },
}

/// Everything a handler needs that isn't its own payload. Handlers
/// must not call job-store `Complete*` themselves — the dispatcher does
/// that based on the returned `HandlerOutcome`.
#[derive(Clone)]
pub struct HandlerContext {
    pub job_id: JobId,
    pub attempt: i16,
    pub cancel: CancellationToken,
    pub object_store: Arc<dyn ObjectStore>,
    pub db: PgPool,
    pub progress: Arc<ProgressTracker>,
}

impl HandlerContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record a coarse progress percentage for this job. A no-op beyond
    /// updating the in-process tracker — it never touches the job row.
    pub fn report_progress(&self, percent: u8) {
        self.progress.set(self.job_id, percent);
    }
}

/// A handler is identified by `queue_name`. Payload deserialization happens
/// inside `execute` itself and a bad payload is always terminal.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    fn queue_name(&self) -> &'static str;

    async fn execute(&self, payload: &serde_json::Value, ctx: HandlerContext) -> HandlerOutcome;
}
