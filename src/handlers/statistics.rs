use axum::{extract::State, response::Json};

use crate::{handlers::AppState, services::tracking::Statistics};

#[utoipa::path(
    get,
    path = "/api/v1/statistics",
    responses((status = 200, description = "Aggregate conversion statistics", body = Statistics)),
    tag = "statistics"
)]
pub async fn statistics(State(state): State<AppState>) -> Json<Statistics> {
    Json(state.tracking.statistics().await)
}
