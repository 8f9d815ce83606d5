use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};

use crate::{
    errors::{AppError, Result},
    handlers::AppState,
    models::quota::{UserQuota, UserQuotaPatch},
    services::quota::UserQuotaEntry,
};

#[utoipa::path(
    get,
    path = "/api/v1/users",
    responses((status = 200, description = "Every quota record", body = Vec<UserQuotaEntry>)),
    tag = "users"
)]
pub async fn list_quotas(State(state): State<AppState>) -> Json<Vec<UserQuotaEntry>> {
    Json(state.quota.find_all().await)
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}",
    params(("user_id" = String, Path, description = "User identifier")),
    responses(
        (status = 200, description = "Quota record", body = UserQuota),
        (status = 404, description = "No record for this user"),
    ),
    tag = "users"
)]
pub async fn get_quota(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserQuota>> {
    match state.quota.get_status(&user_id).await {
        Some(record) => Ok(Json(record)),
        None => Err(AppError::NotFound),
    }
}

#[utoipa::path(
    patch,
    path = "/api/v1/users/{user_id}",
    params(("user_id" = String, Path, description = "User identifier")),
    request_body = UserQuotaPatch,
    responses((status = 204, description = "Patch accepted")),
    tag = "users"
)]
pub async fn update_quota(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(patch): Json<UserQuotaPatch>,
) -> StatusCode {
    state.quota.update_record(&user_id, patch).await;
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/{user_id}",
    params(("user_id" = String, Path, description = "User identifier")),
    responses((status = 204, description = "Record removed")),
    tag = "users"
)]
pub async fn delete_quota(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> StatusCode {
    state.quota.delete_record(&user_id).await;
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    post,
    path = "/api/v1/users/sync-to-mirror",
    request_body(content = Vec<String>, description = "User ids to sync; omit for all"),
    responses((status = 202, description = "Sync ran")),
    tag = "users"
)]
pub async fn sync_to_mirror(
    State(state): State<AppState>,
    body: Option<Json<Vec<String>>>,
) -> StatusCode {
    let user_ids = body.map(|Json(ids)| ids);
    let count = state.quota.sync_to_mirror(user_ids).await;
    tracing::info!(count, "sync to mirror finished");
    StatusCode::ACCEPTED
}

#[utoipa::path(
    post,
    path = "/api/v1/users/sync-from-mirror",
    request_body(content = Vec<String>, description = "User ids to restore; omit for all"),
    responses((status = 202, description = "Sync ran")),
    tag = "users"
)]
pub async fn sync_from_mirror(
    State(state): State<AppState>,
    body: Option<Json<Vec<String>>>,
) -> StatusCode {
    let user_ids = body.map(|Json(ids)| ids);
    let count = state.quota.sync_from_mirror(user_ids).await;
    tracing::info!(count, "sync from mirror finished");
    StatusCode::ACCEPTED
}
