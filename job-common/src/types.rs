use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique id assigned to a job at enqueue time. Never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Display-only status derived from a job row's boolean flags. Not a stored column:
/// the row itself is the source of truth, this is a projection for listing/status APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A durable queue row, as persisted. Field names follow the spec's data model exactly.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JobRow {
    pub id: JobId,
    pub queue_name: String,
    pub payload: serde_json::Value,
    pub actor_id: Option<String>,
    pub priority: i16,
    pub run_at: DateTime<Utc>,
    pub attempts: i16,
    pub max_attempts: i16,
    pub locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub complete: bool,
    pub completed_with_failure: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub version: i64,
    pub dedupe_key: Option<String>,
    pub reclaim_count: i32,
}

impl JobRow {
    pub fn status(&self) -> JobStatus {
        if self.complete {
            JobStatus::Succeeded
        } else if self.completed_with_failure {
            JobStatus::Failed
        } else if self.locked {
            JobStatus::InProgress
        } else {
            JobStatus::Pending
        }
    }
}

/// Options accepted by `Enqueue`.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: Option<i16>,
    pub run_at: Option<DateTime<Utc>>,
    pub max_attempts: Option<i16>,
    pub actor_id: Option<String>,
    pub dedupe_key: Option<String>,
}

pub const DEFAULT_PRIORITY: i16 = 5;
pub const DEFAULT_MAX_ATTEMPTS: i16 = 3;

/// Outcome the dispatcher passes to `CompleteFailure`.
#[derive(Debug, Clone)]
pub enum RetryDecision {
    RetryAt(DateTime<Utc>),
    Terminal,
}

/// Filter accepted by `List`.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub queue_name: Option<String>,
    pub status: Option<JobStatus>,
    pub actor_id: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
}

/// Maximum size of `last_error` text retained on a row.
pub const MAX_LAST_ERROR_BYTES: usize = 4096;

pub fn truncate_error(error_text: &str) -> String {
    if error_text.len() <= MAX_LAST_ERROR_BYTES {
        return error_text.to_owned();
    }
    let mut end = MAX_LAST_ERROR_BYTES;
    while !error_text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &error_text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reflects_flags() {
        let base = JobRow {
            id: JobId::new(),
            queue_name: "pdf_generation".into(),
            payload: serde_json::json!({}),
            actor_id: None,
            priority: 5,
            run_at: Utc::now(),
            attempts: 0,
            max_attempts: 3,
            locked: false,
            locked_at: None,
            locked_by: None,
            last_error: None,
            complete: false,
            completed_with_failure: false,
            completed_at: None,
            failed_at: None,
            created: Utc::now(),
            updated: Utc::now(),
            version: 1,
            dedupe_key: None,
            reclaim_count: 0,
        };
        assert_eq!(base.status(), JobStatus::Pending);

        let mut locked = base.clone();
        locked.locked = true;
        assert_eq!(locked.status(), JobStatus::InProgress);

        let mut succeeded = base.clone();
        succeeded.complete = true;
        assert_eq!(succeeded.status(), JobStatus::Succeeded);

        let mut failed = base;
        failed.completed_with_failure = true;
        assert_eq!(failed.status(), JobStatus::Failed);
    }

    #[test]
    fn truncate_error_caps_length() {
        let long = "x".repeat(MAX_LAST_ERROR_BYTES + 100);
        let truncated = truncate_error(&long);
        assert!(truncated.len() < long.len());
        assert!(truncated.ends_with("(truncated)"));
    }

    #[test]
    fn truncate_error_leaves_short_text_untouched() {
        assert_eq!(truncate_error("boom"), "boom");
    }
}
