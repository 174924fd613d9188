//! # JobStore
//!
//! Durable queue backed by a PostgreSQL table, with atomic claim via
//! `FOR UPDATE SKIP LOCKED`.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::error::{QueueError, QueueResult};
use crate::types::{
    truncate_error, EnqueueOptions, JobId, JobRow, ListFilter, JobStatus, RetryDecision,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY,
};

/// Default number of times a row may be reclaimed before it is dead-lettered.
pub const DEFAULT_MAX_RECLAIMS: i32 = 5;

#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> QueueResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|error| QueueError::ConnectionError { error })?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Enqueue a job. If `options.dedupe_key` is set and a non-terminal row already
    /// exists for `(queue_name, dedupe_key)`, this is a no-op returning the existing id.
    pub async fn enqueue(
        &self,
        queue_name: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> QueueResult<JobId> {
        let id = JobId::new();
        let priority = options.priority.unwrap_or(DEFAULT_PRIORITY);
        let max_attempts = options.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let run_at = options.run_at.unwrap_or_else(Utc::now);

        let row = sqlx::query(
            r#"
INSERT INTO jobs
    (id, queue_name, payload, actor_id, priority, run_at, max_attempts, dedupe_key)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8)
ON CONFLICT (queue_name, dedupe_key)
    WHERE dedupe_key IS NOT NULL AND NOT complete AND NOT completed_with_failure
    DO UPDATE SET queue_name = jobs.queue_name
RETURNING id
            "#,
        )
        .bind(id)
        .bind(queue_name)
        .bind(&payload)
        .bind(&options.actor_id)
        .bind(priority)
        .bind(run_at)
        .bind(max_attempts)
        .bind(&options.dedupe_key)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| QueueError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        let returned: JobId = row.try_get("id").map_err(|error| QueueError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;
        if returned != id {
            crate::metrics::record_dedupe_collision(queue_name);
        }
        Ok(returned)
    }

    /// Atomically claim up to `max_n` runnable rows across every queue, ordered by
    /// `(priority DESC, run_at ASC, created ASC)`. Never blocks on rows held
    /// by another claimer.
    pub async fn claim_batch(
        &self,
        worker_id: &str,
        max_n: i64,
        lock_ttl: std::time::Duration,
    ) -> QueueResult<Vec<JobRow>> {
        let _ = lock_ttl; // lock_ttl governs ReclaimStuck, not the claim itself.
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
WITH runnable AS (
    SELECT id
    FROM jobs
    WHERE run_at <= NOW()
      AND NOT locked
      AND NOT complete
      AND NOT completed_with_failure
    ORDER BY priority DESC, run_at ASC, created ASC
    LIMIT $2
    FOR UPDATE SKIP LOCKED
)
UPDATE jobs
SET locked = true,
    locked_at = NOW(),
    locked_by = $1,
    attempts = jobs.attempts + 1,
    updated = NOW(),
    version = jobs.version + 1
FROM runnable
WHERE jobs.id = runnable.id
RETURNING jobs.*
            "#,
        )
        .bind(worker_id)
        .bind(max_n)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| QueueError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        Ok(rows)
    }

    /// Mark a job permanently succeeded. Requires the caller still holds the lock.
    pub async fn complete_success(&self, job_id: JobId, worker_id: &str) -> QueueResult<()> {
        let result = sqlx::query(
            r#"
UPDATE jobs
SET complete = true,
    completed_at = NOW(),
    locked = false,
    locked_at = NULL,
    locked_by = NULL,
    last_error = NULL,
    updated = NOW(),
    version = version + 1
WHERE id = $1 AND locked AND locked_by = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|error| QueueError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LockLost {
                job_id,
                worker_id: worker_id.to_owned(),
            });
        }
        Ok(())
    }

    /// Record a failed attempt, either scheduling a retry or terminally failing the job.
    pub async fn complete_failure(
        &self,
        job_id: JobId,
        worker_id: &str,
        error_text: &str,
        retry_decision: RetryDecision,
    ) -> QueueResult<()> {
        let truncated = truncate_error(error_text);

        let result = match retry_decision {
            RetryDecision::RetryAt(retry_at) => {
                sqlx::query(
                    r#"
UPDATE jobs
SET locked = false,
    locked_at = NULL,
    locked_by = NULL,
    run_at = $3,
    last_error = $4,
    updated = NOW(),
    version = version + 1
WHERE id = $1 AND locked AND locked_by = $2
                    "#,
                )
                .bind(job_id)
                .bind(worker_id)
                .bind(retry_at)
                .bind(&truncated)
                .execute(&self.pool)
                .await
            }
            RetryDecision::Terminal => {
                sqlx::query(
                    r#"
UPDATE jobs
SET completed_with_failure = true,
    failed_at = NOW(),
    locked = false,
    locked_at = NULL,
    locked_by = NULL,
    last_error = $3,
    updated = NOW(),
    version = version + 1
WHERE id = $1 AND locked AND locked_by = $2
                    "#,
                )
                .bind(job_id)
                .bind(worker_id)
                .bind(&truncated)
                .execute(&self.pool)
                .await
            }
        }
        .map_err(|error| QueueError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LockLost {
                job_id,
                worker_id: worker_id.to_owned(),
            });
        }
        Ok(())
    }

    /// Return every stuck row (`locked` past `lock_ttl`) to pending without
    /// incrementing `attempts`. Returns the number of rows reclaimed.
    pub async fn reclaim_stuck(&self, lock_ttl: std::time::Duration) -> QueueResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(lock_ttl).unwrap_or_default();

        let result = sqlx::query(
            r#"
UPDATE jobs
SET locked = false,
    locked_at = NULL,
    locked_by = NULL,
    reclaim_count = reclaim_count + 1,
    updated = NOW(),
    version = version + 1
WHERE locked
  AND locked_at < $1
  AND NOT complete
  AND NOT completed_with_failure
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|error| QueueError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        Ok(result.rows_affected())
    }

    /// Dead-letter rows whose `reclaim_count` has crossed `max_reclaims`: the
    /// durable, cross-process backstop against a job that poisons every worker that
    /// claims it.
    pub async fn dead_letter_poisoned(&self, max_reclaims: i32) -> QueueResult<u64> {
        let result = sqlx::query(
            r#"
UPDATE jobs
SET completed_with_failure = true,
    failed_at = NOW(),
    locked = false,
    locked_at = NULL,
    locked_by = NULL,
    last_error = 'poisoned: reclaimed too many times',
    updated = NOW(),
    version = version + 1
WHERE NOT locked
  AND NOT complete
  AND NOT completed_with_failure
  AND reclaim_count >= $1
            "#,
        )
        .bind(max_reclaims)
        .execute(&self.pool)
        .await
        .map_err(|error| QueueError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        Ok(result.rows_affected())
    }

    pub async fn get_by_id(&self, job_id: JobId) -> QueueResult<JobRow> {
        sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?
            .ok_or(QueueError::NotFound(job_id))
    }

    pub async fn list(&self, filter: ListFilter, limit: i64) -> QueueResult<Vec<JobRow>> {
        // The filter set is small and known ahead of time; build the predicate
        // positionally rather than pulling in a query-builder dependency.
        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        if let Some(queue_name) = &filter.queue_name {
            clauses.push(format!("queue_name = ${}", binds.len() + 1));
            binds.push(queue_name.clone());
        }
        if let Some(actor_id) = &filter.actor_id {
            clauses.push(format!("actor_id = ${}", binds.len() + 1));
            binds.push(actor_id.clone());
        }
        if let Some(status) = filter.status {
            clauses.push(match status {
                JobStatus::Pending => "(NOT locked AND NOT complete AND NOT completed_with_failure)".to_owned(),
                JobStatus::InProgress => "locked".to_owned(),
                JobStatus::Succeeded => "complete".to_owned(),
                JobStatus::Failed => "completed_with_failure".to_owned(),
            });
        }

        let created_after_idx = filter.created_after.map(|_| {
            binds.push(String::new()); // placeholder slot reserved below
            binds.len()
        });
        if let Some(idx) = created_after_idx {
            clauses.push(format!("created > ${idx}"));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let query = format!(
            "SELECT * FROM jobs {where_clause} ORDER BY priority DESC, run_at ASC, created ASC LIMIT {limit}"
        );

        let mut q = sqlx::query_as::<_, JobRow>(&query);
        if let Some(queue_name) = &filter.queue_name {
            q = q.bind(queue_name);
        }
        if let Some(actor_id) = &filter.actor_id {
            q = q.bind(actor_id);
        }
        if let Some(created_after) = filter.created_after {
            q = q.bind(created_after);
        }

        q.fetch_all(&self.pool)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })
    }

    /// Atomically transition a pending, non-locked row to terminal failure.
    /// Returns false if the row is already locked or terminal.
    pub async fn cancel_pending(&self, job_id: JobId) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
UPDATE jobs
SET completed_with_failure = true,
    failed_at = NOW(),
    last_error = 'cancelled',
    updated = NOW(),
    version = version + 1
WHERE id = $1
  AND NOT locked
  AND NOT complete
  AND NOT completed_with_failure
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|error| QueueError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Count of PDF jobs enqueued by a given user in the trailing `since` window, used
    /// by both the façade's fast-fail check and the handler's own defense.
    pub async fn count_recent_jobs_for_actor(
        &self,
        queue_name: &str,
        actor_id: &str,
        since: DateTime<Utc>,
    ) -> QueueResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM jobs WHERE queue_name = $1 AND actor_id = $2 AND created >= $3",
        )
        .bind(queue_name)
        .bind(actor_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| QueueError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })?;

        row.try_get::<i64, _>("n")
            .map_err(|error| QueueError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn default_max_reclaims_matches_spec() {
        assert_eq!(DEFAULT_MAX_RECLAIMS, 5);
    }

    async fn enqueue_with_priority_run_at(
        store: &JobStore,
        priority: i16,
        run_at: DateTime<Utc>,
    ) -> JobId {
        store
            .enqueue(
                "pdf_generation",
                serde_json::json!({}),
                EnqueueOptions {
                    priority: Some(priority),
                    run_at: Some(run_at),
                    ..Default::default()
                },
            )
            .await
            .expect("enqueue succeeds")
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn dedupe_key_returns_existing_id_while_non_terminal(pool: sqlx::PgPool) {
        let store = JobStore::from_pool(pool);

        let options = EnqueueOptions {
            dedupe_key: Some("analytics_rollup:2026-07-28".to_owned()),
            ..Default::default()
        };

        let first = store
            .enqueue("analytics_rollup", serde_json::json!({}), options.clone())
            .await
            .expect("first enqueue succeeds");
        let second = store
            .enqueue("analytics_rollup", serde_json::json!({}), options)
            .await
            .expect("second enqueue is a no-op");

        assert_eq!(first, second);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn dedupe_key_allows_a_new_row_once_the_old_one_is_terminal(pool: sqlx::PgPool) {
        let store = JobStore::from_pool(pool);
        let options = EnqueueOptions {
            dedupe_key: Some("guest_session_cleanup:2026-07-28".to_owned()),
            ..Default::default()
        };

        let first = store
            .enqueue("guest_session_cleanup", serde_json::json!({}), options.clone())
            .await
            .unwrap();
        assert!(store.cancel_pending(first).await.unwrap());

        let second = store
            .enqueue("guest_session_cleanup", serde_json::json!({}), options)
            .await
            .unwrap();

        assert_ne!(first, second);
    }

    /// Spec scenario 5: with a single worker, priority dominates `run_at`;
    /// equal priority breaks ties by earlier `run_at`, equal both by earlier `created`.
    #[sqlx::test(migrations = "./migrations")]
    async fn claim_batch_orders_by_priority_then_run_at_then_created(pool: sqlx::PgPool) {
        let store = JobStore::from_pool(pool);
        let now = Utc::now();

        let low1 = enqueue_with_priority_run_at(&store, 1, now - chrono::Duration::minutes(3)).await;
        let low2 = enqueue_with_priority_run_at(&store, 1, now - chrono::Duration::minutes(2)).await;
        let low3 = enqueue_with_priority_run_at(&store, 1, now - chrono::Duration::minutes(1)).await;
        let high = enqueue_with_priority_run_at(&store, 10, now).await;

        let claimed = store
            .claim_batch("worker-1", 4, std::time::Duration::from_secs(300))
            .await
            .expect("claim succeeds");

        let ids: Vec<JobId> = claimed.iter().map(|row| row.id).collect();
        assert_eq!(ids, vec![high, low1, low2, low3]);
    }

    /// Two concurrent claimers against 10 runnable rows must together claim
    /// all 10, with no row returned to both (skip-locked, not blocking).
    #[sqlx::test(migrations = "./migrations")]
    async fn claim_batch_skip_locked_never_double_claims(pool: sqlx::PgPool) {
        let store_a = JobStore::from_pool(pool.clone());
        let store_b = JobStore::from_pool(pool);

        for _ in 0..10 {
            enqueue_with_priority_run_at(&store_a, 5, Utc::now()).await;
        }

        let (a, b) = tokio::join!(
            store_a.claim_batch("worker-a", 10, std::time::Duration::from_secs(300)),
            store_b.claim_batch("worker-b", 10, std::time::Duration::from_secs(300)),
        );
        let a = a.expect("claim a succeeds");
        let b = b.expect("claim b succeeds");

        let a_ids: HashSet<JobId> = a.iter().map(|row| row.id).collect();
        let b_ids: HashSet<JobId> = b.iter().map(|row| row.id).collect();

        assert!(a_ids.is_disjoint(&b_ids));
        assert_eq!(a_ids.len() + b_ids.len(), 10);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn complete_success_requires_the_lock(pool: sqlx::PgPool) {
        let store = JobStore::from_pool(pool);
        let id = enqueue_with_priority_run_at(&store, 5, Utc::now()).await;

        store
            .claim_batch("worker-1", 1, std::time::Duration::from_secs(300))
            .await
            .unwrap();

        let result = store.complete_success(id, "worker-2").await;
        assert!(matches!(result, Err(QueueError::LockLost { .. })));

        store.complete_success(id, "worker-1").await.unwrap();
        let row = store.get_by_id(id).await.unwrap();
        assert!(row.complete);
    }

    /// Spec scenario 4: a worker that sleeps past `lock_ttl` loses the lock;
    /// `ReclaimStuck` returns the row to pending without bumping `attempts`,
    /// and the stale worker's later `CompleteSuccess` call gets `LockLost`.
    #[sqlx::test(migrations = "./migrations")]
    async fn reclaim_stuck_returns_row_to_pending_and_drops_stale_completion(pool: sqlx::PgPool) {
        let store = JobStore::from_pool(pool);
        let id = enqueue_with_priority_run_at(&store, 5, Utc::now()).await;

        let claimed = store
            .claim_batch("worker-1", 1, std::time::Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(claimed[0].attempts, 1);

        // lock_ttl of zero means every locked row older than "now" is stuck.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let reclaimed = store
            .reclaim_stuck(std::time::Duration::from_millis(0))
            .await
            .unwrap();
        assert_eq!(reclaimed, 1);

        let row = store.get_by_id(id).await.unwrap();
        assert!(!row.locked);
        assert_eq!(row.attempts, 1, "reclaim must not count as an attempt");

        let stale_result = store.complete_success(id, "worker-1").await;
        assert!(matches!(stale_result, Err(QueueError::LockLost { .. })));

        let reclaimed_batch = store
            .claim_batch("worker-2", 1, std::time::Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(reclaimed_batch[0].id, id);
        assert_eq!(reclaimed_batch[0].attempts, 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn cancel_pending_is_idempotent_and_only_applies_to_unlocked_rows(pool: sqlx::PgPool) {
        let store = JobStore::from_pool(pool);
        let id = enqueue_with_priority_run_at(&store, 5, Utc::now() + chrono::Duration::hours(1)).await;

        assert!(store.cancel_pending(id).await.unwrap());
        let row = store.get_by_id(id).await.unwrap();
        assert!(row.completed_with_failure);
        assert_eq!(row.last_error.as_deref(), Some("cancelled"));

        assert!(!store.cancel_pending(id).await.unwrap());

        let locked_id = enqueue_with_priority_run_at(&store, 5, Utc::now()).await;
        store
            .claim_batch("worker-1", 1, std::time::Duration::from_secs(300))
            .await
            .unwrap();
        assert!(!store.cancel_pending(locked_id).await.unwrap());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn count_recent_jobs_for_actor_only_counts_matching_queue_and_window(pool: sqlx::PgPool) {
        let store = JobStore::from_pool(pool);
        let now = Utc::now();

        store
            .enqueue(
                "pdf_generation",
                serde_json::json!({}),
                EnqueueOptions {
                    actor_id: Some("user-1".to_owned()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .enqueue(
                "pdf_generation",
                serde_json::json!({}),
                EnqueueOptions {
                    actor_id: Some("user-2".to_owned()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let count = store
            .count_recent_jobs_for_actor("pdf_generation", "user-1", now - chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(count, 1);

        let count_future_window = store
            .count_recent_jobs_for_actor("pdf_generation", "user-1", now + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(count_future_window, 0);
    }
}
