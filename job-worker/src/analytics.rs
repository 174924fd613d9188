//! Source-data boundary for the analytics rollup handler. The page-view/order
//! schema it aggregates over lives outside this service, so the handler
//! depends on this trait rather than querying those tables directly — the
//! same boundary pattern as `Mailer` and `CalendarRepository`.

use chrono::NaiveDate;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum AnalyticsSourceError {
    #[error("analytics aggregation failed: {0}")]
    AggregationFailed(String),
}

#[derive(Debug, Clone, Default)]
pub struct DailyAggregate {
    pub page_views: i64,
    pub orders: i64,
    pub revenue_cents: i64,
    pub popular_template_id: Option<String>,
}

#[async_trait::async_trait]
pub trait AnalyticsSource: Send + Sync {
    async fn aggregate(&self, rollup_date: NaiveDate) -> Result<DailyAggregate, AnalyticsSourceError>;
}

/// Ships for local/dev use; the real storefront schema is out of scope.
pub struct NoopAnalyticsSource;

#[async_trait::async_trait]
impl AnalyticsSource for NoopAnalyticsSource {
    async fn aggregate(&self, rollup_date: NaiveDate) -> Result<DailyAggregate, AnalyticsSourceError> {
        info!(%rollup_date, "noop analytics source: reporting zeroed aggregate");
        Ok(DailyAggregate::default())
    }
}
