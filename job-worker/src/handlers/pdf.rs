//! PDF generation handler: the heaviest handler, specified fully
//! because its failure handling is exemplary.

use std::sync::Arc;

use chrono::Utc;
use job_common::JobStore;
use pdf_render::{CalendarConfig, PrintSize};
use serde::Deserialize;
use tracing::{info, warn};

use crate::handler::{HandlerContext, HandlerOutcome, JobHandler};
use crate::repository::{CalendarRepository, PdfResult, RepositoryError};

pub const QUEUE_NAME: &str = "pdf_generation";

#[derive(Debug, Deserialize)]
pub struct PdfJobPayload {
    pub calendar_id: String,
    #[serde(default)]
    pub watermark: bool,
    pub requested_by_user_id: Option<String>,
    pub output_key_hint: Option<String>,
}

pub struct PdfGenerationHandler {
    pub calendar_repo: Arc<dyn CalendarRepository>,
    pub job_store: JobStore,
    pub print_size: PrintSize,
    pub free_tier_daily_cap: i64,
}

#[async_trait::async_trait]
impl JobHandler for PdfGenerationHandler {
    fn queue_name(&self) -> &'static str {
        QUEUE_NAME
    }

    async fn execute(&self, payload: &serde_json::Value, ctx: HandlerContext) -> HandlerOutcome {
        let payload: PdfJobPayload = match serde_json::from_value(payload.clone()) {
            Ok(payload) => payload,
            Err(error) => {
                return HandlerOutcome::TerminalFailure {
                    reason: format!("invalid payload: {error}"),
                }
            }
        };

        ctx.report_progress(10);

        // Step 2: load calendar + template + events.
        let snapshot = match self.calendar_repo.get(&payload.calendar_id).await {
            Ok(snapshot) => snapshot,
            Err(RepositoryError::NotFound) => {
                return HandlerOutcome::TerminalFailure {
                    reason: "calendar_not_found".to_owned(),
                }
            }
            Err(RepositoryError::QueryFailed(error)) => {
                warn!(error = %error, "transient calendar lookup failure");
                return HandlerOutcome::RetryableFailure {
                    reason: "storage_unavailable".to_owned(),
                };
            }
        };

        // Step 3: authorize.
        if let Some(requested_by) = &payload.requested_by_user_id {
            if snapshot.owner_user_id.as_deref() != Some(requested_by.as_str()) {
                return HandlerOutcome::TerminalFailure {
                    reason: "unauthorized".to_owned(),
                };
            }
        }

        // Step 4: enforce the free-tier rate limit as the handler's own defense,
        // mirroring the façade's fast-fail check against the same repository
        // method.
        if !snapshot.owner_is_paid {
            if let Some(user_id) = &payload.requested_by_user_id {
                let since = Utc::now() - chrono::Duration::hours(24);
                match self
                    .job_store
                    .count_recent_jobs_for_actor(QUEUE_NAME, user_id, since)
                    .await
                {
                    Ok(count) if count >= self.free_tier_daily_cap => {
                        return HandlerOutcome::TerminalFailure {
                            reason: "rate_limited".to_owned(),
                        };
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(error = %error, "rate limit lookup failed, retrying");
                        return HandlerOutcome::RetryableFailure {
                            reason: "storage_unavailable".to_owned(),
                        };
                    }
                }
            }
        }

        if ctx.is_cancelled() {
            return HandlerOutcome::RetryableFailure {
                reason: "cancelled".to_owned(),
            };
        }

        ctx.report_progress(40);

        // Steps 5-7: render SVG, watermark, transcode.
        let config = CalendarConfig {
            calendar_id: payload.calendar_id.clone(),
            template_id: snapshot.template_id.clone(),
            config_version: snapshot.config_version,
            year: snapshot.year,
            months: snapshot.months.iter().map(|&m| m as u32).collect(),
            print_size: self.print_size,
        };

        let rendered = match pdf_render::render(&config, &snapshot.events, payload.watermark) {
            Ok(rendered) => rendered,
            Err(error) => {
                warn!(error = %error.to_string(), "pdf render failed");
                return HandlerOutcome::RetryableFailure {
                    reason: "render_failed".to_owned(),
                };
            }
        };

        // The fingerprint tuple deliberately excludes the watermark flag;
        // disambiguate the object key so free/paid renders don't collide.
        let owner_segment = payload
            .requested_by_user_id
            .clone()
            .unwrap_or_else(|| "anonymous".to_owned());
        let tier_suffix = if payload.watermark { "preview" } else { "final" };
        let key = payload.output_key_hint.clone().unwrap_or_else(|| {
            format!(
                "calendars/{owner_segment}/{calendar_id}/{fingerprint}-{tier_suffix}.pdf",
                calendar_id = payload.calendar_id,
                fingerprint = rendered.fingerprint,
            )
        });

        ctx.report_progress(70);

        // Short-circuit when this exact render already exists.
        match ctx.object_store.exists(&key).await {
            Ok(true) => {
                info!(key, "render already uploaded, skipping put");
            }
            Ok(false) => {
                // Step 8: upload.
                if let Err(error) = ctx
                    .object_store
                    .put(&key, rendered.bytes.clone(), "application/pdf", ctx.cancel.clone())
                    .await
                {
                    warn!(error = %error.to_string(), "pdf upload failed");
                    return HandlerOutcome::RetryableFailure {
                        reason: "storage_unavailable".to_owned(),
                    };
                }
            }
            Err(error) => {
                warn!(error = %error.to_string(), "object store exists check failed");
                return HandlerOutcome::RetryableFailure {
                    reason: "storage_unavailable".to_owned(),
                };
            }
        }

        ctx.report_progress(90);

        // Step 9: record result (last-writer-wins by generated_at).
        let result = PdfResult {
            pdf_object_key: key,
            pdf_bytes_hash: rendered.bytes_hash,
            generated_at: Utc::now(),
            last_job_id: ctx.job_id.to_string(),
        };

        if let Err(error) = self
            .calendar_repo
            .record_pdf_result(&payload.calendar_id, result)
            .await
        {
            warn!(error = %error.to_string(), "failed to record pdf result");
            return HandlerOutcome::RetryableFailure {
                reason: "storage_unavailable".to_owned(),
            };
        }

        HandlerOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::PgCalendarRepository;
    use job_common::{EnqueueOptions, JobId, JobStore};
    use object_store::MockObjectStore;
    use tokio_util::sync::CancellationToken;

    async fn seed_free_tier_calendar(pool: &sqlx::PgPool, calendar_id: &str, owner_user_id: &str) {
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

    fn test_context(pool: sqlx::PgPool) -> HandlerContext {
        HandlerContext {
            job_id: JobId::new(),
            attempt: 1,
            cancel: CancellationToken::new(),
            object_store: Arc::new(MockObjectStore::new()),
            db: pool,
            progress: Arc::new(job_common::progress::ProgressTracker::default()),
        }
    }

    /// Handler-side defense from §4.5 step 4: even if the façade's fast-fail
    /// check were bypassed, a free-tier user already at the daily cap gets a
    /// terminal `rate_limited` failure, never a retry.
    #[sqlx::test(migrations = "../job-common/migrations")]
    async fn execute_rate_limits_free_tier_user_at_cap(pool: sqlx::PgPool) {
        let job_store = JobStore::from_pool(pool.clone());
        seed_free_tier_calendar(&pool, "cal-1", "user-1").await;

        for _ in 0..3 {
            job_store
                .enqueue(
                    QUEUE_NAME,
                    serde_json::json!({}),
                    EnqueueOptions {
                        actor_id: Some("user-1".to_owned()),
                        ..Default::default()
                    },
                )
                .await
                .expect("seed enqueue succeeds");
        }

        let handler = PdfGenerationHandler {
            calendar_repo: Arc::new(PgCalendarRepository::new(pool.clone())),
            job_store,
            print_size: PrintSize::default(),
            free_tier_daily_cap: 3,
        };

        let payload = serde_json::json!({
            "calendar_id": "cal-1",
            "watermark": true,
            "requested_by_user_id": "user-1",
        });

        let outcome = handler.execute(&payload, test_context(pool)).await;
        assert!(matches!(
            outcome,
            HandlerOutcome::TerminalFailure { reason } if reason == "rate_limited"
        ));
    }
}
