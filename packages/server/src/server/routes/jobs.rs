//! Job RPC surface for out-of-process workers.
//!
//! `GET /jobs/wait` long-polls a claim; the other routes mirror the
//! dispatch contract (heartbeat, reschedule) over HTTP so a worker does
//! not need direct backend access.

use std::time::Duration;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::kernel::jobs::{AssetType, HeartbeatOutcome, Job};
use crate::server::app::AppState;

#[derive(Deserialize)]
pub struct EnqueueRequest {
    pub asset_type: AssetType,
    pub asset_id: Uuid,
    pub owner_id: Uuid,
    #[serde(default)]
    pub payload: Option<Value>,
}

pub async fn enqueue_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let mut job = Job::for_asset(request.asset_type, request.asset_id, request.owner_id);
    if let Some(payload) = request.payload {
        job = job.with_payload(payload);
    }

    let id = state
        .backend
        .enqueue(job)
        .await
        .map_err(internal_error)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

#[derive(Deserialize)]
pub struct WaitQuery {
    pub asset_type: AssetType,
    pub worker_id: String,
    /// Optional cap below the backend's own bounded wait
    pub timeout_ms: Option<u64>,
}

/// Blocks up to the backend's bounded wait (or `timeout_ms`, whichever is
/// shorter) and returns the claimed job, or null when nothing is due.
pub async fn wait_handler(
    Extension(state): Extension<AppState>,
    Query(query): Query<WaitQuery>,
) -> Result<Json<Option<Job>>, (StatusCode, Json<Value>)> {
    let claim = state.backend.claim(query.asset_type, &query.worker_id);

    let claimed = match query.timeout_ms {
        Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), claim).await {
            Ok(result) => result,
            Err(_) => return Ok(Json(None)),
        },
        None => claim.await,
    };

    claimed.map(Json).map_err(internal_error)
}

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
}

/// 200 when the claim was renewed, 404 when the job is gone (clients
/// tolerate), 409 when another worker holds the lease.
pub async fn heartbeat_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<Uuid>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let outcome = state
        .backend
        .heartbeat(job_id, &request.worker_id)
        .await
        .map_err(internal_error)?;

    Ok(match outcome {
        HeartbeatOutcome::Extended => (StatusCode::OK, Json(json!({ "status": "extended" }))),
        HeartbeatOutcome::JobGone => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "job not found" })),
        ),
        HeartbeatOutcome::NotOwner => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "lease held by another worker" })),
        ),
    })
}

#[derive(Deserialize)]
pub struct RescheduleRequest {
    pub worker_id: String,
    pub delay_ms: u64,
}

pub async fn reschedule_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<Uuid>,
    Json(request): Json<RescheduleRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let found = state
        .backend
        .reschedule(job_id, Duration::from_millis(request.delay_ms))
        .await
        .map_err(internal_error)?;

    Ok(if found {
        (StatusCode::OK, Json(json!({ "status": "rescheduled" })))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "job not found" })),
        )
    })
}

pub(crate) fn internal_error(error: anyhow::Error) -> (StatusCode, Json<Value>) {
    tracing::error!(%error, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
}
