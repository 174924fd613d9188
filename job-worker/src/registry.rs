//! Handler registry: maps `queue_name` to its `JobHandler`, and wraps every
//! `Execute` call in the panic-recovery boundary.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use job_common::JobId;

use crate::handler::{HandlerContext, HandlerOutcome, JobHandler};

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    /// Consecutive-panic counter per job id. Process-local, not durable — the
    /// durable poison-pill backstop is `ReclaimStuck`'s `reclaim_count`.
    panic_counts: Mutex<HashMap<JobId, u32>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.queue_name(), handler);
    }

    pub fn get(&self, queue_name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(queue_name).cloned()
    }

    /// Run `handler.execute` behind `catch_unwind`. The first panic for a job id
    /// becomes a `RetryableFailure`; a second consecutive panic for the same job
    /// id becomes a `TerminalFailure`.
    pub async fn dispatch(
        &self,
        handler: &dyn JobHandler,
        payload: &serde_json::Value,
        ctx: HandlerContext,
    ) -> HandlerOutcome {
        let job_id = ctx.job_id;

        let result = AssertUnwindSafe(handler.execute(payload, ctx))
            .catch_unwind()
            .await;

        match result {
            Ok(outcome) => {
                self.clear_panic_count(job_id);
                outcome
            }
            Err(_) => self.record_panic(job_id),
        }
    }

    fn record_panic(&self, job_id: JobId) -> HandlerOutcome {
        let mut counts = self.panic_counts.lock().expect("poisoned panic counter mutex");
        let count = counts.entry(job_id).or_insert(0);
        *count += 1;

        if *count >= 2 {
            counts.remove(&job_id);
            HandlerOutcome::TerminalFailure {
                reason: "handler panicked repeatedly".to_owned(),
            }
        } else {
            HandlerOutcome::RetryableFailure {
                reason: "handler panicked".to_owned(),
            }
        }
    }

    pub fn clear_panic_count(&self, job_id: JobId) {
        self.panic_counts
            .lock()
            .expect("poisoned panic counter mutex")
            .remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerContext;
    use object_store::MockObjectStore;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct PanickingHandler;

    #[async_trait::async_trait]
    impl JobHandler for PanickingHandler {
        fn queue_name(&self) -> &'static str {
            "panics"
        }

        async fn execute(&self, _payload: &serde_json::Value, _ctx: HandlerContext) -> HandlerOutcome {
            panic!("boom");
        }
    }

    fn test_context(job_id: JobId, pool: sqlx::PgPool) -> HandlerContext {
        HandlerContext {
            job_id,
            attempt: 1,
            cancel: CancellationToken::new(),
            object_store: Arc::new(MockObjectStore::new()),
            db: pool,
            progress: Arc::new(job_common::progress::ProgressTracker::default()),
        }
    }

    #[sqlx::test(migrations = "../job-common/migrations")]
    async fn first_panic_is_retryable_second_is_terminal(pool: sqlx::PgPool) {
        let registry = HandlerRegistry::new();
        let handler = PanickingHandler;
        let job_id = JobId::new();
        let payload = serde_json::json!({});

        let first = registry
            .dispatch(&handler, &payload, test_context(job_id, pool.clone()))
            .await;
        assert!(matches!(first, HandlerOutcome::RetryableFailure { .. }));

        let second = registry
            .dispatch(&handler, &payload, test_context(job_id, pool))
            .await;
        assert!(matches!(second, HandlerOutcome::TerminalFailure { .. }));
    }
}
