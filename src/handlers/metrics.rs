use axum::{extract::State, http::StatusCode, response::Response};

use crate::{
    errors::{AppError, Result},
    handlers::AppState,
};

pub async fn metrics_handler(State(state): State<AppState>) -> Result<Response<String>> {
    let body = state.metrics.render()?;
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4")
        .body(body)
        .map_err(|e| AppError::Internal(e.into()))
}
