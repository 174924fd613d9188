pub mod analytics;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod mailer;
pub mod registry;
pub mod repository;

pub use config::Config;
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::WorkerError;
pub use handler::{HandlerContext, HandlerOutcome, JobHandler};
pub use registry::HandlerRegistry;
pub use repository::{CalendarRepository, CalendarSnapshot, PdfResult, PgCalendarRepository, RepositoryError};

use std::sync::Arc;

use job_common::{JobStore, ProgressTracker, RetryPolicy};
use pdf_render::PrintSize;

use crate::analytics::NoopAnalyticsSource;
use crate::mailer::NoopMailer;

/// Build the registry this process dispatches against. Swapping in a real
/// `Mailer`/`AnalyticsSource` implementation is the only thing a deployment
/// needs to change — the handlers themselves are already wired to the
/// narrow collaborator traits.
pub fn build_registry(
    calendar_repo: Arc<dyn CalendarRepository>,
    job_store: JobStore,
    config: &Config,
) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register(Arc::new(handlers::PdfGenerationHandler {
        calendar_repo,
        job_store,
        print_size: PrintSize {
            width_in: config.pdf_print_width_in,
            height_in: config.pdf_print_height_in,
            dpi: config.pdf_dpi,
        },
        free_tier_daily_cap: config.pdf_free_tier_daily_cap,
    }));

    let mailer: Arc<dyn mailer::Mailer> = Arc::new(NoopMailer);
    registry.register(Arc::new(handlers::OrderConfirmationEmailHandler {
        mailer: mailer.clone(),
    }));
    registry.register(Arc::new(handlers::ShippingNotificationHandler { mailer }));

    registry.register(Arc::new(handlers::AnalyticsRollupHandler {
        source: Arc::new(NoopAnalyticsSource),
    }));

    registry.register(Arc::new(handlers::GuestSessionCleanupHandler));

    registry
}

pub fn default_progress_tracker() -> Arc<ProgressTracker> {
    Arc::new(ProgressTracker::default())
}

pub fn retry_policy_from_config(config: &Config) -> RetryPolicy {
    RetryPolicy::new(config.retry_base.0, config.retry_max.0)
}

pub fn dispatcher_config_from(config: &Config) -> DispatcherConfig {
    DispatcherConfig {
        worker_id: config.resolved_worker_name(),
        pool_size: config.pool_size,
        batch_size: config.resolved_batch_size(),
        poll_interval: config.poll_interval.0,
        lock_ttl: config.lock_ttl.0,
        reclaim_interval: config.reclaim_interval.0,
        shutdown_grace: config.shutdown_grace.0,
    }
}
