//! The Job-Status façade: the only surface the HTTP layer uses to
//! enqueue and poll jobs. Thin by design — every real decision (claim,
//! retry, terminal failure) happens in the job store or the handler; this
//! module just shapes those primitives into the calls `serve-api` exposes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use job_common::{EnqueueOptions, JobId, JobRow, JobStatus, ListFilter, QueueError};
use job_worker::CalendarRepository;
use object_store::ObjectStore;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;

/// Must match `job_worker::handlers::pdf::QUEUE_NAME`; duplicated here rather
/// than importing the handler type so the façade doesn't need to depend on
/// the PDF handler's render/upload machinery, only on the queue name string.
pub const PDF_QUEUE_NAME: &str = "pdf_generation";

#[derive(Error, Debug)]
pub enum FacadeError {
    #[error("calendar not found")]
    CalendarNotFound,
    #[error("rate_limited")]
    RateLimited,
    #[error("job not found")]
    JobNotFound,
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("repository error: {0}")]
    Repository(#[from] job_worker::RepositoryError),
}

/// Status shape returned to HTTP clients.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    #[serde(rename = "jobId")]
    pub job_id: JobId,
    pub state: JobStatus,
    #[serde(rename = "progressPct", skip_serializing_if = "Option::is_none")]
    pub progress_pct: Option<u8>,
    #[serde(rename = "resultUrl", skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: i16,
}

pub struct JobStatusFacade {
    store: job_common::JobStore,
    calendar_repo: Arc<dyn CalendarRepository>,
    object_store: Arc<dyn ObjectStore>,
    /// Populated only when the façade shares a process with the dispatcher
    /// (`serve-all`); `None` in a standalone `serve-api` process, where
    /// progress is simply unavailable since the progress map is itself
    /// process-local and optional.
    progress: Option<Arc<job_common::progress::ProgressTracker>>,
    db: PgPool,
    signed_url_ttl: Duration,
    pdf_free_tier_daily_cap: i64,
}

impl JobStatusFacade {
    pub fn new(
        store: job_common::JobStore,
        calendar_repo: Arc<dyn CalendarRepository>,
        object_store: Arc<dyn ObjectStore>,
        progress: Option<Arc<job_common::progress::ProgressTracker>>,
        db: PgPool,
        signed_url_ttl: Duration,
        pdf_free_tier_daily_cap: i64,
    ) -> Self {
        Self {
            store,
            calendar_repo,
            object_store,
            progress,
            db,
            signed_url_ttl,
            pdf_free_tier_daily_cap,
        }
    }

    /// Enqueue a PDF generation job. Performs the rate-limit fast-fail check
    /// before writing a row, in addition to the
    /// handler's own defense against the same repository method.
    pub async fn enqueue_pdf_generation(
        &self,
        calendar_id: &str,
        watermark: bool,
        user_id: Option<String>,
    ) -> Result<JobId, FacadeError> {
        let snapshot = match self.calendar_repo.get(calendar_id).await {
            Ok(snapshot) => snapshot,
            Err(job_worker::RepositoryError::NotFound) => {
                return Err(FacadeError::CalendarNotFound)
            }
            Err(error) => return Err(FacadeError::Repository(error)),
        };

        if !snapshot.owner_is_paid {
            if let Some(user_id) = &user_id {
                let since = Utc::now() - chrono::Duration::hours(24);
                let count = self
                    .store
                    .count_recent_jobs_for_actor(PDF_QUEUE_NAME, user_id, since)
                    .await?;
                if count >= self.pdf_free_tier_daily_cap {
                    return Err(FacadeError::RateLimited);
                }
            }
        }

        let payload = serde_json::json!({
            "calendar_id": calendar_id,
            "watermark": watermark,
            "requested_by_user_id": user_id,
        });

        // actor_id keys the rate-limit count, so it must be the requesting user,
        // not the calendar, whenever a user is known; anonymous requests fall
        // back to the calendar id for listing/auditing purposes only.
        let actor_id = user_id.clone().unwrap_or_else(|| calendar_id.to_owned());

        let job_id = self
            .store
            .enqueue(
                PDF_QUEUE_NAME,
                payload,
                EnqueueOptions {
                    actor_id: Some(actor_id),
                    ..Default::default()
                },
            )
            .await?;

        Ok(job_id)
    }

    /// `GetJobStatus`. Mints a fresh signed URL for succeeded PDF jobs.
    pub async fn get_job_status(&self, job_id: JobId) -> Result<JobStatusView, FacadeError> {
        let row = self
            .store
            .get_by_id(job_id)
            .await
            .map_err(|error| match error {
                QueueError::NotFound(_) => FacadeError::JobNotFound,
                other => FacadeError::Queue(other),
            })?;

        let state = row.status();

        let progress_pct = match state {
            JobStatus::InProgress => self
                .progress
                .as_ref()
                .and_then(|tracker| tracker.get(job_id)),
            _ => None,
        };

        let result_url = if state == JobStatus::Succeeded && row.queue_name == PDF_QUEUE_NAME {
            self.signed_pdf_url(job_id).await
        } else {
            None
        };

        Ok(JobStatusView {
            job_id: row.id,
            state,
            progress_pct,
            result_url,
            error: row.last_error,
            attempts: row.attempts,
        })
    }

    async fn signed_pdf_url(&self, job_id: JobId) -> Option<String> {
        let key: Option<String> = sqlx::query_scalar(
            "SELECT pdf_object_key FROM calendar_pdf_results WHERE last_job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.db)
        .await
        .unwrap_or_default();

        let key = key?;
        match self.object_store.signed_get(&key, self.signed_url_ttl).await {
            Ok(url) => Some(url),
            Err(error) => {
                tracing::warn!(error = %error, %job_id, "failed to mint signed url");
                None
            }
        }
    }

    /// `ListJobs` (admin only). Authorization is enforced by the HTTP
    /// layer this service doesn't own; the façade only shapes the query.
    pub async fn list_jobs(&self, filter: ListFilter, limit: i64) -> Result<Vec<JobRow>, FacadeError> {
        Ok(self.store.list(filter, limit).await?)
    }

    /// `RetryFailed` (admin only): creates a new job with the same payload.
    pub async fn retry_failed(&self, job_id: JobId) -> Result<JobId, FacadeError> {
        let row = self.store.get_by_id(job_id).await.map_err(|error| match error {
            QueueError::NotFound(_) => FacadeError::JobNotFound,
            other => FacadeError::Queue(other),
        })?;

        let new_id = self
            .store
            .enqueue(
                &row.queue_name,
                row.payload,
                EnqueueOptions {
                    priority: Some(row.priority),
                    max_attempts: Some(row.max_attempts),
                    actor_id: row.actor_id,
                    ..Default::default()
                },
            )
            .await?;

        Ok(new_id)
    }

    /// `CancelPending` passthrough.
    pub async fn cancel_pending(&self, job_id: JobId) -> Result<bool, FacadeError> {
        Ok(self.store.cancel_pending(job_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_worker::PgCalendarRepository;
    use object_store::MockObjectStore;

    async fn seed_free_tier_calendar(pool: &PgPool, calendar_id: &str, owner_user_id: &str) {
        sqlx::query(
            r#"
INSERT INTO calendar_snapshots (calendar_id, template_id, config_version, year, months, owner_user_id, owner_is_paid, events)
VALUES ($1, 'classic', 1, 2026, ARRAY[1]::SMALLINT[], $2, false, '[]'::jsonb)
            "#,
        )
        .bind(calendar_id)
        .bind(owner_user_id)
        .execute(pool)
        .await
        .expect("seed calendar snapshot");
    }

    fn test_facade(pool: PgPool, cap: i64) -> JobStatusFacade {
        let store = job_common::JobStore::from_pool(pool.clone());
        let repo = Arc::new(PgCalendarRepository::new(pool.clone()));
        JobStatusFacade::new(
            store,
            repo,
            Arc::new(MockObjectStore::new()),
            None,
            pool,
            Duration::from_secs(3600),
            cap,
        )
    }

    /// Spec scenario 2: a user at the free-tier cap gets a synchronous
    /// `rate_limited` error and no row is inserted for the request that tips
    /// them over. This exercises the real enqueue path end to end, covering
    /// the `actor_id` the rate-limit count actually keys on.
    #[sqlx::test(migrations = "../job-common/migrations")]
    async fn enqueue_pdf_generation_rate_limits_free_tier_user(pool: sqlx::PgPool) {
        let facade = test_facade(pool.clone(), 3);
        seed_free_tier_calendar(&pool, "cal-1", "user-2").await;

        for _ in 0..3 {
            facade
                .enqueue_pdf_generation("cal-1", true, Some("user-2".to_owned()))
                .await
                .expect("first three enqueues succeed");
        }

        let result = facade
            .enqueue_pdf_generation("cal-1", true, Some("user-2".to_owned()))
            .await;
        assert!(matches!(result, Err(FacadeError::RateLimited)));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE queue_name = $1")
            .bind(PDF_QUEUE_NAME)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 3, "the rate-limited request must not insert a row");
    }

    #[sqlx::test(migrations = "../job-common/migrations")]
    async fn enqueue_pdf_generation_keys_actor_id_on_the_requesting_user(pool: sqlx::PgPool) {
        let facade = test_facade(pool.clone(), 10);
        seed_free_tier_calendar(&pool, "cal-1", "user-1").await;

        let job_id = facade
            .enqueue_pdf_generation("cal-1", true, Some("user-1".to_owned()))
            .await
            .expect("enqueue succeeds");

        let actor_id: String = sqlx::query_scalar("SELECT actor_id FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(actor_id, "user-1", "actor_id must match the user the rate limit counts on");
    }
}
