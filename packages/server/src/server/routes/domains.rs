use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use admission::{AdmissionError, DomainStats};

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct DomainsResponse {
    pub domains: Vec<DomainStats>,
    pub blocked: Vec<BlockedDomain>,
}

#[derive(Serialize)]
pub struct BlockedDomain {
    pub domain: String,
    pub until: chrono::DateTime<chrono::Utc>,
}

/// Admission gate introspection: per-domain counters and active blocks.
pub async fn domains_handler(Extension(state): Extension<AppState>) -> Json<DomainsResponse> {
    let blocked = state
        .gate
        .blocked_domains()
        .into_iter()
        .map(|(domain, until)| BlockedDomain { domain, until })
        .collect();
    Json(DomainsResponse {
        domains: state.gate.stats(),
        blocked,
    })
}

pub async fn unblock_domain_handler(
    Extension(state): Extension<AppState>,
    Path(domain): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.gate.unblock_domain(&domain) {
        Ok(was_blocked) => (StatusCode::OK, Json(json!({ "unblocked": was_blocked }))),
        Err(AdmissionError::InvalidDomain { .. }) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid domain" })),
        ),
        Err(error) => {
            tracing::error!(%error, "unblock failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
        }
    }
}
