//! Guest-session cleanup handler. The session/auth schema itself
//! is out of scope; `guest_sessions` is the narrow table this service
//! owns to demonstrate the cleanup operation against.

use serde::Deserialize;
use tracing::info;

use crate::handler::{HandlerContext, HandlerOutcome, JobHandler};

pub const QUEUE_NAME: &str = "guest_session_cleanup";

#[derive(Debug, Deserialize)]
pub struct GuestSessionCleanupPayload {
    pub older_than_days: i64,
}

pub struct GuestSessionCleanupHandler;

#[async_trait::async_trait]
impl JobHandler for GuestSessionCleanupHandler {
    fn queue_name(&self) -> &'static str {
        QUEUE_NAME
    }

    async fn execute(&self, payload: &serde_json::Value, ctx: HandlerContext) -> HandlerOutcome {
        let payload: GuestSessionCleanupPayload = match serde_json::from_value(payload.clone()) {
            Ok(payload) => payload,
            Err(error) => {
                return HandlerOutcome::TerminalFailure {
                    reason: format!("invalid payload: {error}"),
                }
            }
        };

        let cutoff = chrono::Utc::now() - chrono::Duration::days(payload.older_than_days);

        let result = sqlx::query("DELETE FROM guest_sessions WHERE created < $1")
            .bind(cutoff)
            .execute(&ctx.db)
            .await;

        match result {
            Ok(outcome) => {
                info!(deleted = outcome.rows_affected(), "guest sessions cleaned up");
                HandlerOutcome::Success
            }
            Err(error) => HandlerOutcome::RetryableFailure {
                reason: format!("storage_unavailable: {error}"),
            },
        }
    }
}
