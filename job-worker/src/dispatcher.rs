//! Dispatcher + worker pool: claims batches of runnable rows,
//! hands each to its registered handler on a bounded pool of concurrent
//! tasks, and finalizes the row based on the returned `HandlerOutcome`.

use std::sync::Arc;
use std::time::Duration;

use job_common::metrics::{
    record_job_claimed, record_job_failed_terminal, record_job_retried, record_job_succeeded,
    record_pool_saturation, record_reclaimed,
};
use job_common::progress::ProgressTracker;
use job_common::store::DEFAULT_MAX_RECLAIMS;
use job_common::{JobRow, JobStore, QueueError, RetryDecision, RetryPolicy};
use object_store::ObjectStore;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};

use crate::handler::HandlerContext;
use crate::registry::HandlerRegistry;

pub struct DispatcherConfig {
    pub worker_id: String,
    pub pool_size: usize,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub lock_ttl: Duration,
    pub reclaim_interval: Duration,
    pub shutdown_grace: Duration,
}

pub struct Dispatcher {
    store: JobStore,
    registry: Arc<HandlerRegistry>,
    retry_policy: RetryPolicy,
    progress: Arc<ProgressTracker>,
    object_store: Arc<dyn ObjectStore>,
    config: DispatcherConfig,
    liveness: health::HealthHandle,
}

impl Dispatcher {
    pub fn new(
        store: JobStore,
        registry: Arc<HandlerRegistry>,
        retry_policy: RetryPolicy,
        progress: Arc<ProgressTracker>,
        object_store: Arc<dyn ObjectStore>,
        config: DispatcherConfig,
        liveness: health::HealthHandle,
    ) -> Self {
        Self {
            store,
            registry,
            retry_policy,
            progress,
            object_store,
            config,
            liveness,
        }
    }

    /// Drive claim -> dispatch -> finalize until `shutdown` fires, then wait
    /// up to `shutdown_grace` for in-flight handlers before returning.
    pub async fn run(&self, shutdown: tokio_util::sync::CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.config.pool_size));
        let mut poll_ticker = tokio::time::interval(self.config.poll_interval);
        let mut reclaim_ticker = tokio::time::interval(self.config.reclaim_interval);
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            record_pool_saturation(
                self.config.pool_size - semaphore.available_permits(),
                self.config.pool_size,
            );

            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                _ = poll_ticker.tick() => {
                    self.liveness.report_healthy().await;
                    self.poll_and_dispatch(&semaphore, &mut in_flight, shutdown.clone()).await;
                }
                _ = reclaim_ticker.tick() => {
                    self.run_reclaim().await;
                }
            }
        }

        info!("dispatcher shutting down, draining in-flight handlers");
        let grace = tokio::time::sleep(self.config.shutdown_grace);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                _ = &mut grace => {
                    if !in_flight.is_empty() {
                        warn!("shutdown grace period elapsed with handlers still running");
                    }
                    break;
                }
                joined = in_flight.join_next() => {
                    if joined.is_none() {
                        break;
                    }
                }
            }
        }
    }

    async fn poll_and_dispatch(
        &self,
        semaphore: &Arc<Semaphore>,
        in_flight: &mut JoinSet<()>,
        shutdown: tokio_util::sync::CancellationToken,
    ) {
        let free = semaphore.available_permits();
        if free == 0 {
            return;
        }

        let max_n = free.min(self.config.batch_size) as i64;
        let rows = match self
            .store
            .claim_batch(&self.config.worker_id, max_n, self.config.lock_ttl)
            .await
        {
            Ok(rows) => rows,
            Err(error) => {
                warn!(error = %error, "claim_batch failed");
                return;
            }
        };

        for row in rows {
            record_job_claimed(&row.queue_name);

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore has been closed");

            let store = self.store.clone();
            let registry = self.registry.clone();
            let retry_policy = self.retry_policy;
            let progress = self.progress.clone();
            let object_store = self.object_store.clone();
            let worker_id = self.config.worker_id.clone();
            let cancel = shutdown.clone();
            let db = self.store.pool().clone();

            let span = info_span!(
                "job",
                job_id = %row.id,
                queue_name = %row.queue_name,
                attempt = row.attempts,
            );

            in_flight.spawn(
                async move {
                    run_one(
                        row,
                        &store,
                        &registry,
                        retry_policy,
                        progress,
                        object_store,
                        &worker_id,
                        db,
                        cancel,
                    )
                    .await;
                    drop(permit);
                }
                .instrument(span),
            );
        }
    }

    async fn run_reclaim(&self) {
        match self.store.reclaim_stuck(self.config.lock_ttl).await {
            Ok(count) if count > 0 => {
                info!(count, "reclaimed stuck jobs");
                record_reclaimed(count);
            }
            Ok(_) => {}
            Err(error) => warn!(error = %error, "reclaim_stuck failed"),
        }

        if let Err(error) = self.store.dead_letter_poisoned(DEFAULT_MAX_RECLAIMS).await {
            warn!(error = %error, "dead_letter_poisoned failed");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_one(
    row: JobRow,
    store: &JobStore,
    registry: &HandlerRegistry,
    retry_policy: RetryPolicy,
    progress: Arc<ProgressTracker>,
    object_store: Arc<dyn ObjectStore>,
    worker_id: &str,
    db: sqlx::PgPool,
    cancel: tokio_util::sync::CancellationToken,
) {
    let Some(handler) = registry.get(&row.queue_name) else {
        warn!(queue_name = %row.queue_name, "no handler registered for queue, dropping");
        let _ = store
            .complete_failure(
                row.id,
                worker_id,
                "no handler registered",
                RetryDecision::Terminal,
            )
            .await;
        return;
    };

    let ctx = HandlerContext {
        job_id: row.id,
        attempt: row.attempts,
        cancel,
        object_store,
        db,
        progress: progress.clone(),
    };

    let outcome = registry.dispatch(handler.as_ref(), &row.payload, ctx).await;
    progress.clear(row.id);

    let finalize_result = match outcome {
        crate::handler::HandlerOutcome::Success => {
            record_job_succeeded(&row.queue_name);
            store.complete_success(row.id, worker_id).await
        }
        crate::handler::HandlerOutcome::TerminalFailure { reason } => {
            record_job_failed_terminal(&row.queue_name);
            store
                .complete_failure(row.id, worker_id, &reason, RetryDecision::Terminal)
                .await
        }
        crate::handler::HandlerOutcome::RetryableFailure { reason } => {
            if row.attempts >= row.max_attempts {
                record_job_failed_terminal(&row.queue_name);
                store
                    .complete_failure(row.id, worker_id, &reason, RetryDecision::Terminal)
                    .await
            } else {
                record_job_retried(&row.queue_name);
                let delay = retry_policy.delay_for_attempt(row.attempts as u32);
                let retry_at = chrono::Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_default();
                store
                    .complete_failure(row.id, worker_id, &reason, RetryDecision::RetryAt(retry_at))
                    .await
            }
        }
    };

    if let Err(QueueError::LockLost { job_id, worker_id }) = finalize_result {
        warn!(%job_id, %worker_id, "lock lost while finalizing job, dropping result");
    } else if let Err(error) = finalize_result {
        warn!(error = %error, "failed to finalize job");
    }
}
