use crate::handlers::AppState;
use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::convert::convert,
        crate::handlers::convert::quota_status,
        crate::handlers::statistics::statistics,
        crate::handlers::users::list_quotas,
        crate::handlers::users::get_quota,
        crate::handlers::users::update_quota,
        crate::handlers::users::delete_quota,
        crate::handlers::users::sync_to_mirror,
        crate::handlers::users::sync_from_mirror,
        crate::handlers::health::liveness,
    ),
    components(
        schemas(
            crate::models::ConvertRequest,
            crate::models::ImageFile,
            crate::models::ConvertResponse,
            crate::models::UserQuota,
            crate::models::UserQuotaPatch,
            crate::models::PlanTier,
            crate::services::quota::UserQuotaEntry,
            crate::services::tracking::Statistics,
        )
    ),
    tags(
        (name = "convert", description = "Calendar extraction endpoints"),
        (name = "users", description = "Quota administration endpoints"),
        (name = "statistics", description = "Usage reporting endpoints"),
        (name = "health", description = "Health check endpoints")
    ),
    info(
        title = "Calendar Extraction API",
        version = "1.0.0",
        description = "Converts calendar images into ICS documents with per-user monthly quotas",
    )
)]
pub struct ApiDoc;

pub fn create_docs_router() -> Router<AppState> {
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
