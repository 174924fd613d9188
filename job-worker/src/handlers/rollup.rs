//! Analytics rollup handler: a straightforward SQL aggregation,
//! enqueued once a day by the scheduler.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::warn;

use crate::analytics::AnalyticsSource;
use crate::handler::{HandlerContext, HandlerOutcome, JobHandler};

pub const QUEUE_NAME: &str = "analytics_rollup";

#[derive(Debug, Deserialize)]
pub struct AnalyticsRollupPayload {
    pub rollup_date: NaiveDate,
}

pub struct AnalyticsRollupHandler {
    pub source: Arc<dyn AnalyticsSource>,
}

#[async_trait::async_trait]
impl JobHandler for AnalyticsRollupHandler {
    fn queue_name(&self) -> &'static str {
        QUEUE_NAME
    }

    async fn execute(&self, payload: &serde_json::Value, ctx: HandlerContext) -> HandlerOutcome {
        let payload: AnalyticsRollupPayload = match serde_json::from_value(payload.clone()) {
            Ok(payload) => payload,
            Err(error) => {
                return HandlerOutcome::TerminalFailure {
                    reason: format!("invalid payload: {error}"),
                }
            }
        };

        let aggregate = match self.source.aggregate(payload.rollup_date).await {
            Ok(aggregate) => aggregate,
            Err(error) => {
                warn!(error = %error, "analytics aggregation failed");
                return HandlerOutcome::RetryableFailure {
                    reason: "aggregation_failed".to_owned(),
                };
            }
        };

        match upsert_rollup(&ctx.db, payload.rollup_date, &aggregate).await {
            Ok(()) => HandlerOutcome::Success,
            Err(error) => {
                warn!(error = %error, "analytics rollup write failed");
                HandlerOutcome::RetryableFailure {
                    reason: "storage_unavailable".to_owned(),
                }
            }
        }
    }
}

async fn upsert_rollup(
    pool: &PgPool,
    rollup_date: NaiveDate,
    aggregate: &crate::analytics::DailyAggregate,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
INSERT INTO analytics_rollups (rollup_date, page_views, orders, revenue_cents, popular_template_id)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (rollup_date) DO UPDATE SET
    page_views = EXCLUDED.page_views,
    orders = EXCLUDED.orders,
    revenue_cents = EXCLUDED.revenue_cents,
    popular_template_id = EXCLUDED.popular_template_id,
    computed_at = NOW()
        "#,
    )
    .bind(rollup_date)
    .bind(aggregate.page_views)
    .bind(aggregate.orders)
    .bind(aggregate.revenue_cents)
    .bind(&aggregate.popular_template_id)
    .execute(pool)
    .await?;

    Ok(())
}
