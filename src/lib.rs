pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod services;
pub mod store;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::handlers::AppState;
use crate::services::{
    extraction::ExtractionService, metrics::MetricsService, mirror::QuotaMirror,
    quota::QuotaService, tracking::TrackingService,
};

pub async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let store = store::create_store(&config).await?;
    let metrics = Arc::new(MetricsService::new());
    let mirror = QuotaMirror::new(&config, metrics.clone());
    let quota = QuotaService::new(store.clone(), mirror.clone(), metrics.clone());
    let tracking = TrackingService::new(&config);
    let extraction = ExtractionService::new(&config);

    Ok(AppState {
        config,
        store,
        quota,
        mirror,
        tracking,
        extraction,
        metrics,
    })
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/convert", post(handlers::convert::convert))
        .route(
            "/api/v1/convert/quota-status",
            get(handlers::convert::quota_status),
        )
        .route("/api/v1/statistics", get(handlers::statistics::statistics))
        .route("/api/v1/users", get(handlers::users::list_quotas))
        .route(
            "/api/v1/users/sync-to-mirror",
            post(handlers::users::sync_to_mirror),
        )
        .route(
            "/api/v1/users/sync-from-mirror",
            post(handlers::users::sync_from_mirror),
        )
        .route(
            "/api/v1/users/:user_id",
            get(handlers::users::get_quota)
                .patch(handlers::users::update_quota)
                .delete(handlers::users::delete_quota),
        )
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        .route("/metrics", get(handlers::metrics::metrics_handler))
        .merge(handlers::docs::create_docs_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
