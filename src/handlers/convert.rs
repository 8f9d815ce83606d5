use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    errors::{AppError, Result},
    handlers::AppState,
    models::convert::{ConvertRequest, ConvertResponse, ImageFile, MAX_FILES_PER_REQUEST},
    models::quota::UserQuota,
};

#[utoipa::path(
    post,
    path = "/api/v1/convert",
    request_body = ConvertRequest,
    responses(
        (status = 200, description = "Calendar extracted", body = ConvertResponse),
        (status = 400, description = "Invalid request"),
        (status = 422, description = "No usable calendar data in the images"),
        (status = 429, description = "Monthly conversion limit reached"),
    ),
    tag = "convert"
)]
pub async fn convert(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ConvertRequest>,
) -> Result<Json<ConvertResponse>> {
    let started = Instant::now();
    let user_id = request
        .user_id
        .clone()
        .unwrap_or_else(|| "anonymous".to_string());
    let domain = caller_domain(&headers);
    let file_count = request.files.len() as i64;

    validate(&request)?;

    let quota = state.quota.check_quota(&user_id).await;
    if !quota.allowed {
        let used = (quota.limit - quota.remaining).max(0);
        state
            .tracking
            .log_quota_exceeded(&user_id, used, quota.limit, quota.plan.as_str(), &domain)
            .await;
        state.metrics.record_conversion("quota_exceeded");
        return Err(AppError::QuotaExceeded {
            message: format!(
                "You've reached your monthly conversion limit of {}.",
                quota.limit
            ),
            limit: quota.limit,
            remaining: quota.remaining,
            plan: quota.plan,
        });
    }

    let ics = match state.extraction.generate_ics(&request).await {
        Ok(ics) => ics,
        Err(err) => {
            state
                .tracking
                .log_conversion_error(
                    &user_id,
                    file_count,
                    &err.to_string(),
                    elapsed_ms(started),
                    &domain,
                )
                .await;
            state.metrics.record_conversion("error");
            return Err(err);
        }
    };

    if ics.is_empty() || ics.eq_ignore_ascii_case("null") {
        state
            .tracking
            .log_conversion_error(
                &user_id,
                file_count,
                "No events found in images",
                elapsed_ms(started),
                &domain,
            )
            .await;
        state.metrics.record_conversion("error");
        return Err(AppError::Processing(
            "No calendar events found in the provided images. \
             Please ensure the images contain clear calendar information."
                .to_string(),
        ));
    }

    if !is_valid_ics(&ics) {
        state
            .tracking
            .log_conversion_error(
                &user_id,
                file_count,
                "Generated ICS failed validation",
                elapsed_ms(started),
                &domain,
            )
            .await;
        state.metrics.record_conversion("error");
        return Err(AppError::Processing(
            "The generated calendar data is invalid. Please try again with clearer images."
                .to_string(),
        ));
    }

    let event_count = count_events(&ics) as i64;
    state.quota.increment_usage(&user_id).await;
    state
        .tracking
        .log_conversion(&user_id, file_count, &domain, event_count, elapsed_ms(started))
        .await;
    state.metrics.record_conversion("success");

    tracing::info!(user_id, event_count, "conversion complete");
    Ok(Json(ConvertResponse {
        success: true,
        ics_content: ics,
    }))
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatusQuery {
    pub user_id: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/convert/quota-status",
    params(QuotaStatusQuery),
    responses(
        (status = 200, description = "Current quota record", body = UserQuota),
        (status = 404, description = "No record for this user"),
    ),
    tag = "convert"
)]
pub async fn quota_status(
    State(state): State<AppState>,
    Query(query): Query<QuotaStatusQuery>,
) -> Result<Json<UserQuota>> {
    match state.quota.get_status(&query.user_id).await {
        Some(record) => Ok(Json(record)),
        None => Err(AppError::NotFound),
    }
}

fn validate(request: &ConvertRequest) -> Result<()> {
    if request.files.is_empty() {
        return Err(AppError::Validation(
            "No files provided. Please provide at least one image.".to_string(),
        ));
    }
    if request.files.len() > MAX_FILES_PER_REQUEST {
        return Err(AppError::Validation(format!(
            "Too many files. A single request accepts at most {MAX_FILES_PER_REQUEST} images."
        )));
    }
    if request.files.iter().all(ImageFile::is_empty) {
        return Err(AppError::Validation(
            "All provided files are empty. Please provide valid image data.".to_string(),
        ));
    }
    Ok(())
}

fn caller_domain(headers: &HeaderMap) -> String {
    let value = headers
        .get(header::ORIGIN)
        .or_else(|| headers.get(header::REFERER))
        .and_then(|v| v.to_str().ok());
    match value {
        Some(value) => host_of(value).unwrap_or_else(|| "invalid-url".to_string()),
        None => "unknown".to_string(),
    }
}

fn host_of(value: &str) -> Option<String> {
    let (_, rest) = value.split_once("://")?;
    let authority = rest.split(|c| c == '/' || c == '?' || c == '#').next()?;
    let host = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);
    let host = host.split(':').next()?;
    (!host.is_empty()).then(|| host.to_string())
}

fn is_valid_ics(ics: &str) -> bool {
    ics.starts_with("BEGIN:VCALENDAR")
        && ics.contains("BEGIN:VEVENT")
        && ics.ends_with("END:VCALENDAR")
}

fn count_events(ics: &str) -> usize {
    ics.matches("BEGIN:VEVENT").count()
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}
