use std::sync::Arc;

use axum::{routing, Router};
use tower_http::limit::RequestBodyLimitLayer;

use crate::facade::JobStatusFacade;

use super::jobs;

pub fn add_routes(router: Router, facade: Arc<JobStatusFacade>, max_body_bytes: usize) -> Router {
    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index))
        .route(
            "/jobs/pdf-generation",
            routing::post(jobs::enqueue_pdf_generation)
                .with_state(facade.clone())
                .layer(RequestBodyLimitLayer::new(max_body_bytes)),
        )
        .route(
            "/jobs/:job_id",
            routing::get(jobs::get_job_status).with_state(facade.clone()),
        )
        .route(
            "/jobs/:job_id/retry",
            routing::post(jobs::retry_failed).with_state(facade.clone()),
        )
        .route(
            "/jobs/:job_id/cancel",
            routing::post(jobs::cancel_pending).with_state(facade.clone()),
        )
        .route("/jobs", routing::get(jobs::list_jobs).with_state(facade))
}

pub async fn index() -> &'static str {
    "calyx job-api"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::JobStatusFacade;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use job_worker::PgCalendarRepository;
    use object_store::MockObjectStore;
    use sqlx::PgPool;
    use tower::ServiceExt;

    fn test_facade(pool: PgPool) -> Arc<JobStatusFacade> {
        let store = job_common::JobStore::from_pool(pool.clone());
        let repo = Arc::new(PgCalendarRepository::new(pool.clone()));
        Arc::new(JobStatusFacade::new(
            store,
            repo,
            Arc::new(MockObjectStore::new()),
            None,
            pool,
            std::time::Duration::from_secs(3600),
            3,
        ))
    }

    #[sqlx::test(migrations = "../job-common/migrations")]
    async fn index_is_ok(db: PgPool) {
        let app = add_routes(Router::new(), test_facade(db), 1_000_000);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"calyx job-api");
    }
}
