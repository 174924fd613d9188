//! The `CalendarRepository` boundary: the PDF handler's
//! only window into the calendar/order/user schema this service doesn't own.

use chrono::{DateTime, Utc};
use pdf_render::CalendarEvent;
use sqlx::{PgPool, Row};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("calendar not found")]
    NotFound,
    #[error("repository query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),
}

/// Everything the PDF handler needs to render and authorize against a calendar.
#[derive(Debug, Clone)]
pub struct CalendarSnapshot {
    pub template_id: String,
    pub config_version: i64,
    pub year: i32,
    pub months: Vec<i16>,
    pub owner_user_id: Option<String>,
    pub owner_is_paid: bool,
    pub events: Vec<CalendarEvent>,
}

/// Result written back after a successful render.
#[derive(Debug, Clone)]
pub struct PdfResult {
    pub pdf_object_key: String,
    pub pdf_bytes_hash: String,
    pub generated_at: DateTime<Utc>,
    pub last_job_id: String,
}

#[async_trait::async_trait]
pub trait CalendarRepository: Send + Sync {
    async fn get(&self, calendar_id: &str) -> Result<CalendarSnapshot, RepositoryError>;

    /// Last-writer-wins by `generated_at`, not by job id.
    async fn record_pdf_result(
        &self,
        calendar_id: &str,
        result: PdfResult,
    ) -> Result<(), RepositoryError>;
}

pub struct PgCalendarRepository {
    pool: PgPool,
}

impl PgCalendarRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CalendarRepository for PgCalendarRepository {
    async fn get(&self, calendar_id: &str) -> Result<CalendarSnapshot, RepositoryError> {
        let row = sqlx::query(
            r#"
SELECT template_id, config_version, year, months, owner_user_id, owner_is_paid, events
FROM calendar_snapshots
WHERE calendar_id = $1
            "#,
        )
        .bind(calendar_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)?;

        let events_json: serde_json::Value = row.try_get("events")?;
        let events: Vec<CalendarEvent> = serde_json::from_value(events_json).unwrap_or_default();

        Ok(CalendarSnapshot {
            template_id: row.try_get("template_id")?,
            config_version: row.try_get("config_version")?,
            year: row.try_get("year")?,
            months: row.try_get("months")?,
            owner_user_id: row.try_get("owner_user_id")?,
            owner_is_paid: row.try_get("owner_is_paid")?,
            events,
        })
    }

    async fn record_pdf_result(
        &self,
        calendar_id: &str,
        result: PdfResult,
    ) -> Result<(), RepositoryError> {
        let last_job_id: uuid::Uuid = result
            .last_job_id
            .parse()
            .map_err(|_| RepositoryError::NotFound)?;

        sqlx::query(
            r#"
INSERT INTO calendar_pdf_results (calendar_id, pdf_object_key, pdf_bytes_hash, generated_at, last_job_id)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (calendar_id) DO UPDATE SET
    pdf_object_key = EXCLUDED.pdf_object_key,
    pdf_bytes_hash = EXCLUDED.pdf_bytes_hash,
    generated_at = EXCLUDED.generated_at,
    last_job_id = EXCLUDED.last_job_id
WHERE calendar_pdf_results.generated_at < EXCLUDED.generated_at
            "#,
        )
        .bind(calendar_id)
        .bind(&result.pdf_object_key)
        .bind(&result.pdf_bytes_hash)
        .bind(result.generated_at)
        .bind(last_job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
