use axum::{extract::Extension, http::StatusCode, Json};
use serde_json::Value;

use crate::kernel::jobs::{AssetType, QueueStats};
use crate::server::app::AppState;
use crate::server::routes::jobs::internal_error;

/// Read-only per-asset-type queue counters.
pub async fn queues_handler(
    Extension(state): Extension<AppState>,
) -> Result<Json<Vec<QueueStats>>, (StatusCode, Json<Value>)> {
    let mut stats = Vec::with_capacity(AssetType::ALL.len());
    for asset_type in AssetType::ALL {
        stats.push(
            state
                .backend
                .queue_stats(asset_type)
                .await
                .map_err(internal_error)?,
        );
    }
    Ok(Json(stats))
}
