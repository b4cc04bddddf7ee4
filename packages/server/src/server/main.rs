// Main entry point for the asset processing server

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use admission::DomainGate;
use server_core::kernel::jobs::{
    BackendKind, BrokerConfig, BrokerQueue, DispatchBackend, JobStore, PollConfig, PollQueue,
    PostgresJobStore, ProcessorRegistry, WorkerConfig, WorkerPool,
};
use server_core::kernel::stages::{MemoryAssetStatusStore, ProcessingReporter};
use server_core::kernel::StreamHub;
use server_core::server::{build_app, AppState};
use server_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting asset processing server");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(backend = ?config.backend, "Configuration loaded");

    let shutdown = CancellationToken::new();

    // Select the dispatch backend once; everything downstream sees the trait.
    let mut db_pool = None;
    let backend: Arc<dyn DispatchBackend> = match config.backend {
        BackendKind::Broker => {
            let broker = Arc::new(BrokerQueue::new(BrokerConfig {
                claim_wait: config.claim_wait,
                ..Default::default()
            }));
            broker.spawn_stall_detectors(shutdown.clone());
            broker
        }
        BackendKind::Poll => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set for the poll backend")?;

            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .context("Failed to connect to database")?;

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;

            db_pool = Some(pool.clone());
            let store = Arc::new(PostgresJobStore::new(pool)) as Arc<dyn JobStore>;
            Arc::new(PollQueue::new(
                store,
                PollConfig {
                    claim_wait: config.claim_wait,
                    ..Default::default()
                },
            ))
        }
    };

    let hub = StreamHub::new();
    let gate = Arc::new(DomainGate::new(config.gate.clone()));
    let status_store = Arc::new(MemoryAssetStatusStore::new());
    let reporter = Arc::new(ProcessingReporter::new(hub.clone(), status_store));

    // Asset pipelines register their processors here; each registration
    // gets its own worker loop.
    let registry = ProcessorRegistry::new();
    let worker_config = WorkerConfig {
        concurrency: config.worker_concurrency,
        heartbeat_interval: config.heartbeat_interval,
        ..Default::default()
    };
    let worker_handles = WorkerPool::spawn(
        &registry,
        Arc::clone(&backend),
        Arc::clone(&reporter),
        &worker_config,
        shutdown.clone(),
    );
    tracing::info!(workers = worker_handles.len(), "Worker loops started");

    // Periodically drop stream topics nobody watches anymore.
    {
        let hub = hub.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(60)) => hub.cleanup().await,
                }
            }
        });
    }

    let app = build_app(AppState {
        backend,
        reporter,
        hub,
        gate,
        db_pool,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received, draining workers");
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    for handle in worker_handles {
        let _ = handle.await;
    }
    tracing::info!("Shutdown complete");

    Ok(())
}
