//! The process-wide scheduler ticker: enqueues recurring jobs and
//! drives `ReclaimStuck` independently of any dispatcher's own reclaim
//! ticker. Safe to run in more than one process — every recurring enqueue
//! goes through a bucketed `dedupe_key` so at most one row exists per
//! window regardless of how many schedulers are ticking.

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use job_common::{store::DEFAULT_MAX_RECLAIMS, EnqueueOptions, JobStore};
use tracing::{info, warn};

/// Must match `job_worker::handlers::rollup::QUEUE_NAME`; duplicated so this
/// crate doesn't need to depend on the handler crate for a string constant.
pub const ANALYTICS_ROLLUP_QUEUE: &str = "analytics_rollup";
/// Must match `job_worker::handlers::cleanup::QUEUE_NAME`.
pub const GUEST_SESSION_CLEANUP_QUEUE: &str = "guest_session_cleanup";

pub struct SchedulerConfig {
    pub analytics_rollup_hour_utc: u32,
    pub guest_session_max_age_days: i64,
    pub tick_interval: std::time::Duration,
    pub reclaim_interval: std::time::Duration,
    pub lock_ttl: std::time::Duration,
}

pub struct Scheduler {
    store: JobStore,
    config: SchedulerConfig,
    liveness: health::HealthHandle,
}

impl Scheduler {
    pub fn new(store: JobStore, config: SchedulerConfig, liveness: health::HealthHandle) -> Self {
        Self {
            store,
            config,
            liveness,
        }
    }

    /// Drive the enqueue tick and the reclaim tick until `shutdown` fires.
    pub async fn run(&self, shutdown: tokio_util::sync::CancellationToken) {
        let mut enqueue_ticker = tokio::time::interval(self.config.tick_interval);
        let mut reclaim_ticker = tokio::time::interval(self.config.reclaim_interval);
        let mut last_rollup_date = None;
        let mut last_cleanup_date = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = enqueue_ticker.tick() => {
                    self.liveness.report_healthy().await;
                    self.maybe_enqueue_analytics_rollup(&mut last_rollup_date).await;
                    self.maybe_enqueue_guest_session_cleanup(&mut last_cleanup_date).await;
                }
                _ = reclaim_ticker.tick() => {
                    self.run_reclaim().await;
                }
            }
        }
    }

    async fn maybe_enqueue_analytics_rollup(&self, last: &mut Option<chrono::NaiveDate>) {
        let now = Utc::now();
        if now.hour() >= self.config.analytics_rollup_hour_utc && *last != Some(now.date_naive()) {
            let rollup_date = now.date_naive().pred_opt().unwrap_or(now.date_naive());
            let bucket = day_bucket(now);
            let dedupe_key = format!("{ANALYTICS_ROLLUP_QUEUE}:{bucket}");

            match self
                .store
                .enqueue(
                    ANALYTICS_ROLLUP_QUEUE,
                    serde_json::json!({ "rollup_date": rollup_date }),
                    EnqueueOptions {
                        dedupe_key: Some(dedupe_key),
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(job_id) => {
                    info!(%job_id, %rollup_date, "enqueued analytics rollup");
                    *last = Some(now.date_naive());
                }
                Err(error) => warn!(error = %error, "failed to enqueue analytics rollup"),
            }
        }
    }

    async fn maybe_enqueue_guest_session_cleanup(&self, last: &mut Option<chrono::NaiveDate>) {
        let now = Utc::now();
        if *last == Some(now.date_naive()) {
            return;
        }

        let bucket = day_bucket(now);
        let dedupe_key = format!("{GUEST_SESSION_CLEANUP_QUEUE}:{bucket}");

        match self
            .store
            .enqueue(
                GUEST_SESSION_CLEANUP_QUEUE,
                serde_json::json!({ "older_than_days": self.config.guest_session_max_age_days }),
                EnqueueOptions {
                    dedupe_key: Some(dedupe_key),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(job_id) => {
                info!(%job_id, "enqueued guest session cleanup");
                *last = Some(now.date_naive());
            }
            Err(error) => warn!(error = %error, "failed to enqueue guest session cleanup"),
        }
    }

    async fn run_reclaim(&self) {
        match self.store.reclaim_stuck(self.config.lock_ttl).await {
            Ok(count) if count > 0 => info!(count, "scheduler reclaimed stuck jobs"),
            Ok(_) => {}
            Err(error) => warn!(error = %error, "scheduler reclaim_stuck failed"),
        }

        if let Err(error) = self.store.dead_letter_poisoned(DEFAULT_MAX_RECLAIMS).await {
            warn!(error = %error, "scheduler dead_letter_poisoned failed");
        }
    }
}

/// Floors `now` to the start of its UTC day and formats it with no
/// sub-second component, so two schedulers
/// ticking within the same clock-skew window compute an identical key.
fn day_bucket(now: DateTime<Utc>) -> String {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_bucket_ignores_time_of_day() {
        let morning = Utc.with_ymd_and_hms(2026, 7, 28, 2, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2026, 7, 28, 23, 59, 59).unwrap();
        assert_eq!(day_bucket(morning), day_bucket(evening));
    }

    #[test]
    fn day_bucket_changes_across_days() {
        let day1 = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 7, 29, 12, 0, 0).unwrap();
        assert_ne!(day_bucket(day1), day_bucket(day2));
    }
}
