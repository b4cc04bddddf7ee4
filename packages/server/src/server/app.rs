//! Application setup and router construction.

use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use admission::DomainGate;

use crate::kernel::jobs::DispatchBackend;
use crate::kernel::stages::ProcessingReporter;
use crate::kernel::StreamHub;
use crate::server::routes::{
    asset_stream_handler, domains_handler, enqueue_handler, health_handler, heartbeat_handler,
    queues_handler, reschedule_handler, unblock_domain_handler, wait_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn DispatchBackend>,
    pub reporter: Arc<ProcessingReporter>,
    pub hub: StreamHub,
    pub gate: Arc<DomainGate>,
    /// Present in poll mode only; used by the health check
    pub db_pool: Option<PgPool>,
}

/// Build the Axum application router
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/jobs", post(enqueue_handler))
        .route("/jobs/wait", get(wait_handler))
        .route("/jobs/:id/heartbeat", post(heartbeat_handler))
        .route("/jobs/:id/reschedule", post(reschedule_handler))
        .route("/queues", get(queues_handler))
        .route("/domains", get(domains_handler))
        .route("/domains/:domain/unblock", post(unblock_domain_handler))
        .route("/streams/asset/:asset_id", get(asset_stream_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}
