//! `calyx-server`: one binary, three subcommands. `serve-api` mounts
//! the Job Status HTTP API; `serve-worker` runs the dispatcher pool and the
//! recurring scheduler behind a `/metrics` + health-only port; `serve-all`
//! runs both in one process, sharing a single progress tracker between the
//! dispatcher and the façade.
//!
//! This is a deliberate departure from one-binary-per-crate: one operator-
//! facing binary with subcommands and fixed exit codes instead.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use envconfig::Envconfig;
use health::HealthRegistry;
use job_common::JobStore;
use job_worker::{CalendarRepository, PgCalendarRepository};
use tokio_util::sync::CancellationToken;

mod config;

use config::{BindConfig, ObjectStoreEnvConfig};

#[derive(Parser)]
#[command(name = "calyx-server", version, about = "calyx job subsystem")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the Job Status HTTP API only; no worker pool.
    ServeApi,
    /// Run the worker pool and the recurring scheduler; no HTTP API.
    ServeWorker,
    /// Run the HTTP API, the worker pool, and the scheduler in one process.
    ServeAll,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(error = %error, "failed to start the tokio runtime");
            std::process::exit(1);
        }
    };

    let exit_code = runtime.block_on(async move {
        match cli.command {
            Command::ServeApi => run_serve_api().await,
            Command::ServeWorker => run_serve_worker().await,
            Command::ServeAll => run_serve_all().await,
        }
    });

    std::process::exit(exit_code);
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            return;
        };
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
    shutdown.cancel();
}

/// `/_liveness`, `/_readiness` backed by the shared registry rather than a
/// static body, for the binaries that don't also mount the Job Status API.
fn health_router(liveness: HealthRegistry) -> axum::Router {
    let for_liveness = liveness.clone();
    let for_readiness = liveness;

    axum::Router::new()
        .route(
            "/_liveness",
            axum::routing::get(move || {
                let liveness = for_liveness.clone();
                async move { liveness.get_status() }
            }),
        )
        .route(
            "/_readiness",
            axum::routing::get(move || {
                let liveness = for_readiness.clone();
                async move { liveness.get_status() }
            }),
        )
}

async fn run_serve_api() -> i32 {
    let config = match job_api::Config::init_from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(error = %error, "failed to load serve-api configuration");
            return 1;
        }
    };

    let store = match JobStore::connect(&config.database_url, config.max_pg_connections).await {
        Ok(store) => store,
        Err(error) => {
            tracing::error!(error = %error, "failed to connect to the job store database");
            return 1;
        }
    };

    let calendar_repo: Arc<dyn CalendarRepository> =
        Arc::new(PgCalendarRepository::new(store.pool().clone()));
    let object_store: Arc<dyn object_store::ObjectStore> = Arc::new(
        object_store::S3ObjectStore::new(config.object_store_config()).await,
    );

    let facade = Arc::new(job_api::JobStatusFacade::new(
        store.clone(),
        calendar_repo,
        object_store,
        None,
        store.pool().clone(),
        config.signed_url_ttl(),
        config.pdf_free_tier_daily_cap,
    ));

    let router = job_api::handlers::add_routes(axum::Router::new(), facade, config.max_body_bytes);
    let router = job_common::metrics::setup_metrics_routes(router);

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let listener = match tokio::net::TcpListener::bind(config.bind()).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(error = %error, bind = config.bind(), "failed to bind serve-api listener");
            return 1;
        }
    };

    tracing::info!(bind = config.bind(), "serve-api listening");

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;

    match result {
        Ok(()) => 0,
        Err(error) => {
            tracing::error!(error = %error, "serve-api http server exited unexpectedly");
            2
        }
    }
}

async fn run_serve_worker() -> i32 {
    let worker_config = match job_worker::Config::init_from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(error = %error, "failed to load serve-worker configuration");
            return 1;
        }
    };
    let scheduler_config = match job_scheduler::Config::init_from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(error = %error, "failed to load scheduler configuration");
            return 1;
        }
    };
    let object_store_env = match ObjectStoreEnvConfig::init_from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(error = %error, "failed to load object store configuration");
            return 1;
        }
    };
    let bind = match BindConfig::init_from_env() {
        Ok(bind) => bind,
        Err(error) => {
            tracing::error!(error = %error, "failed to load bind configuration");
            return 1;
        }
    };

    let store = match JobStore::connect(&worker_config.database_url, worker_config.max_pg_connections).await {
        Ok(store) => store,
        Err(error) => {
            tracing::error!(error = %error, "failed to connect to the job store database");
            return 1;
        }
    };

    let calendar_repo: Arc<dyn CalendarRepository> =
        Arc::new(PgCalendarRepository::new(store.pool().clone()));
    let object_store: Arc<dyn object_store::ObjectStore> = Arc::new(
        object_store::S3ObjectStore::new(object_store_env.to_object_store_config()).await,
    );

    let registry = Arc::new(job_worker::build_registry(
        calendar_repo,
        store.clone(),
        &worker_config,
    ));

    let liveness = HealthRegistry::new("calyx-worker");
    let dispatcher_liveness = liveness
        .register(
            "dispatcher".to_owned(),
            time::Duration::seconds(worker_config.poll_interval.0.as_secs() as i64 * 4 + 10),
        )
        .await;
    let scheduler_liveness = liveness
        .register(
            "scheduler".to_owned(),
            time::Duration::seconds(scheduler_config.tick_interval.0.as_secs() as i64 * 3 + 10),
        )
        .await;

    let dispatcher = job_worker::Dispatcher::new(
        store.clone(),
        registry,
        job_worker::retry_policy_from_config(&worker_config),
        job_worker::default_progress_tracker(),
        object_store,
        job_worker::dispatcher_config_from(&worker_config),
        dispatcher_liveness,
    );

    let scheduler = job_scheduler::Scheduler::new(
        store,
        scheduler_config.scheduler_config(),
        scheduler_liveness,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let dispatcher_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { dispatcher.run(shutdown).await }
    });
    let scheduler_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { scheduler.run(shutdown).await }
    });

    let router = job_common::metrics::setup_metrics_routes(health_router(liveness));
    let listener = match tokio::net::TcpListener::bind(bind.bind()).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(error = %error, bind = bind.bind(), "failed to bind serve-worker health/metrics listener");
            shutdown.cancel();
            let _ = dispatcher_handle.await;
            let _ = scheduler_handle.await;
            return 1;
        }
    };

    tracing::info!(bind = bind.bind(), "serve-worker listening (metrics/health only)");

    let serve_result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;

    shutdown.cancel();
    let _ = dispatcher_handle.await;
    let _ = scheduler_handle.await;

    match serve_result {
        Ok(()) => 0,
        Err(error) => {
            tracing::error!(error = %error, "serve-worker health/metrics server exited unexpectedly");
            2
        }
    }
}

async fn run_serve_all() -> i32 {
    let api_config = match job_api::Config::init_from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(error = %error, "failed to load serve-api configuration");
            return 1;
        }
    };
    let worker_config = match job_worker::Config::init_from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(error = %error, "failed to load serve-worker configuration");
            return 1;
        }
    };
    let scheduler_config = match job_scheduler::Config::init_from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(error = %error, "failed to load scheduler configuration");
            return 1;
        }
    };

    let store = match JobStore::connect(&api_config.database_url, api_config.max_pg_connections).await {
        Ok(store) => store,
        Err(error) => {
            tracing::error!(error = %error, "failed to connect to the job store database");
            return 1;
        }
    };

    let calendar_repo: Arc<dyn CalendarRepository> =
        Arc::new(PgCalendarRepository::new(store.pool().clone()));
    let object_store: Arc<dyn object_store::ObjectStore> = Arc::new(
        object_store::S3ObjectStore::new(api_config.object_store_config()).await,
    );

    let progress = job_worker::default_progress_tracker();

    let registry = Arc::new(job_worker::build_registry(
        calendar_repo.clone(),
        store.clone(),
        &worker_config,
    ));

    let liveness = HealthRegistry::new("calyx-server");
    let dispatcher_liveness = liveness
        .register(
            "dispatcher".to_owned(),
            time::Duration::seconds(worker_config.poll_interval.0.as_secs() as i64 * 4 + 10),
        )
        .await;
    let scheduler_liveness = liveness
        .register(
            "scheduler".to_owned(),
            time::Duration::seconds(scheduler_config.tick_interval.0.as_secs() as i64 * 3 + 10),
        )
        .await;
    let db_liveness = liveness
        .register("database".to_owned(), time::Duration::seconds(30))
        .await;
    if sqlx::query("SELECT 1").execute(store.pool()).await.is_ok() {
        db_liveness.report_healthy().await;
    }

    let dispatcher = job_worker::Dispatcher::new(
        store.clone(),
        registry,
        job_worker::retry_policy_from_config(&worker_config),
        progress.clone(),
        object_store.clone(),
        job_worker::dispatcher_config_from(&worker_config),
        dispatcher_liveness,
    );

    let scheduler = job_scheduler::Scheduler::new(
        store.clone(),
        scheduler_config.scheduler_config(),
        scheduler_liveness,
    );

    let facade = Arc::new(job_api::JobStatusFacade::new(
        store.clone(),
        calendar_repo,
        object_store,
        Some(progress),
        store.pool().clone(),
        api_config.signed_url_ttl(),
        api_config.pdf_free_tier_daily_cap,
    ));

    let router = job_api::handlers::add_routes(axum::Router::new(), facade, api_config.max_body_bytes);
    let router = job_common::metrics::setup_metrics_routes(router);

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let dispatcher_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { dispatcher.run(shutdown).await }
    });
    let scheduler_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { scheduler.run(shutdown).await }
    });

    let listener = match tokio::net::TcpListener::bind(api_config.bind()).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(error = %error, bind = api_config.bind(), "failed to bind serve-all listener");
            shutdown.cancel();
            let _ = dispatcher_handle.await;
            let _ = scheduler_handle.await;
            return 1;
        }
    };

    tracing::info!(bind = api_config.bind(), "serve-all listening");

    let serve_result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;

    shutdown.cancel();
    let _ = dispatcher_handle.await;
    let _ = scheduler_handle.await;

    match serve_result {
        Ok(()) => 0,
        Err(error) => {
            tracing::error!(error = %error, "serve-all http server exited unexpectedly");
            2
        }
    }
}
