use axum::{extract::State, response::Json};
use serde_json::json;

use crate::{errors::Result, handlers::AppState};

#[utoipa::path(
    get,
    path = "/health/live",
    responses((status = 200, description = "Process is up")),
    tag = "health"
)]
pub async fn liveness() -> Result<Json<serde_json::Value>> {
    Ok(Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn readiness(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let store_status = match state.store.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let mirror_status = if !state.mirror.enabled() {
        "disabled"
    } else if state.mirror.probe().await {
        "healthy"
    } else {
        "unhealthy"
    };

    let overall_status = if store_status == "healthy" && mirror_status != "unhealthy" {
        "ready"
    } else {
        "not_ready"
    };

    Ok(Json(json!({
        "status": overall_status,
        "checks": {
            "store": store_status,
            "mirror": mirror_status
        },
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
