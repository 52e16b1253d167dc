//! Boxoffice HTTP server.
//!
//! Wires the `PostgreSQL` adapters, the HTTP payment gateway client and the
//! job worker around one orchestrator, then serves the API until Ctrl+C or
//! SIGTERM.

use anyhow::Context;
use boxoffice_core::{MachineEnvironment, SystemClock};
use boxoffice_postgres::{JobWorker, PostgresBackend};
use boxoffice_runtime::{
    Collaborators, JobDispatcher, MetricsServer, Orchestrator, Reconciler, RetryPolicy,
};
use boxoffice_web::{AppState, Config, HttpPaymentGateway, router};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,boxoffice=debug,sqlx=warn".into()),
        )
        .with(fmt::layer())
        .init();

    let config = Config::from_env().context("Invalid configuration")?;
    tracing::info!(?config, "Starting boxoffice server");

    // Storage
    let backend = PostgresBackend::connect(&config.postgres.url, config.postgres.max_connections)
        .await
        .context("Failed to connect to PostgreSQL")?;
    backend.migrate().await.context("Failed to run migrations")?;
    tracing::info!("Database ready");

    // Engine
    let gateway = HttpPaymentGateway::new(&config.gateway)
        .context("Failed to build payment gateway client")?;
    let env = MachineEnvironment::new(Arc::new(SystemClock), config.timers);
    let orchestrator = Orchestrator::new(
        Collaborators {
            store: Arc::new(backend.snapshot_store()),
            ledger: Arc::new(backend.ledger()),
            scheduler: Arc::new(backend.job_queue()),
            gateway: Arc::new(gateway),
            events: Arc::new(backend.event_log()),
        },
        env,
    );
    let reconciler = Reconciler::new(orchestrator.clone(), &config.gateway.webhook_token);
    let dispatcher = JobDispatcher::new(orchestrator.clone(), reconciler.clone());

    // Job worker
    let policy = RetryPolicy::builder().max_attempts(config.jobs.max_attempts).build();
    let (worker, worker_shutdown) =
        JobWorker::new(backend.job_queue(), Arc::new(dispatcher), policy);
    let mut worker = worker
        .with_batch_size(config.jobs.batch_size)
        .with_poll_interval(config.jobs.poll_interval);
    let worker_handle = tokio::spawn(async move { worker.start().await });

    // Metrics
    let metrics_addr = config
        .metrics_addr()
        .parse::<std::net::SocketAddr>()
        .context("Invalid metrics address")?;
    let mut metrics = MetricsServer::new(metrics_addr);
    metrics.start().context("Failed to install metrics recorder")?;
    let metrics = Arc::new(metrics);
    let metrics_listener = tokio::net::TcpListener::bind(metrics.addr())
        .await
        .context("Failed to bind metrics listener")?;
    let metrics_app = axum::Router::new().route(
        "/metrics",
        axum::routing::get({
            let metrics = Arc::clone(&metrics);
            move || {
                let body = metrics.render().unwrap_or_default();
                async move { body }
            }
        }),
    );
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_app).await {
            tracing::error!(error = %e, "Metrics listener stopped");
        }
    });

    // HTTP
    let state = AppState::new(orchestrator, reconciler).with_metrics(metrics);
    let app = router(state);
    let addr = config.http_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain the worker
    worker_shutdown.send(true).ok();
    let drain = Duration::from_secs(config.server.shutdown_timeout);
    if tokio::time::timeout(drain, worker_handle).await.is_err() {
        tracing::warn!(?drain, "Job worker did not stop in time");
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
