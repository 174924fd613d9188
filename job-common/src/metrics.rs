use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Add the prometheus endpoint and middleware to a router, should be called last.
pub fn setup_metrics_routes(router: Router) -> Router {
    let recorder_handle = setup_metrics_recorder();

    router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics))
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    const BUCKETS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 50.0, 100.0, 250.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)
        .unwrap()
        .install_recorder()
        .unwrap()
}

/// Middleware to record some common HTTP metrics.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}

/// Records dispatcher/job-queue gauges and counters, called from the worker pool.
pub fn record_job_claimed(queue_name: &str) {
    metrics::counter!("jobs_claimed_total", "queue_name" => queue_name.to_owned()).increment(1);
}

pub fn record_job_succeeded(queue_name: &str) {
    metrics::counter!("jobs_succeeded_total", "queue_name" => queue_name.to_owned()).increment(1);
}

pub fn record_job_retried(queue_name: &str) {
    metrics::counter!("jobs_retried_total", "queue_name" => queue_name.to_owned()).increment(1);
}

pub fn record_job_failed_terminal(queue_name: &str) {
    metrics::counter!("jobs_failed_total", "queue_name" => queue_name.to_owned()).increment(1);
}

pub fn record_pool_saturation(busy: usize, capacity: usize) {
    let ratio = if capacity == 0 {
        0.0
    } else {
        busy as f64 / capacity as f64
    };
    metrics::gauge!("worker_pool_saturation_ratio").set(ratio);
}

pub fn record_reclaimed(count: u64) {
    metrics::counter!("jobs_reclaimed_total").increment(count);
}

pub fn record_dedupe_collision(queue_name: &str) {
    metrics::counter!("jobs_dedupe_collisions_total", "queue_name" => queue_name.to_owned())
        .increment(1);
}
