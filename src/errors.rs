use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::plan::PlanTier;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{message}")]
    QuotaExceeded {
        message: String,
        limit: i64,
        remaining: i64,
        plan: PlanTier,
    },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("External service error ({service}): {message}")]
    ExternalService { service: String, message: String },

    #[error("Not found")]
    NotFound,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Store(ref e) => {
                tracing::error!("Store error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::QuotaExceeded {
                message,
                limit,
                remaining,
                plan,
            } => {
                let body = Json(json!({
                    "error": message,
                    "status": StatusCode::TOO_MANY_REQUESTS.as_u16(),
                    "limit": limit,
                    "remaining": remaining,
                    "plan": plan.as_str(),
                }));
                return (StatusCode::TOO_MANY_REQUESTS, body).into_response();
            }
            AppError::Processing(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::ExternalService {
                ref service,
                ref message,
            } => {
                tracing::error!("External service error ({}): {}", service, message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("{} service error", service),
                )
            }
            AppError::NotFound => (StatusCode::NOT_FOUND, "Resource not found".to_string()),
            AppError::Config(ref msg) => {
                tracing::error!("Configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error".to_string())
            }
            AppError::Internal(ref e) => {
                tracing::error!("Internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
