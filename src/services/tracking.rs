use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::{json, Value};
use utoipa::ToSchema;

use crate::config::Config;

const MAX_ERROR_MESSAGE_LEN: usize = 2000;

/// Best-effort usage journal. Conversion outcomes are appended to a
/// tracking database in the mirror; failures only ever produce log
/// lines.
#[derive(Clone)]
pub struct TrackingService {
    client: Client,
    api_url: String,
    token: String,
    version: String,
    tracking_db_id: Option<String>,
}

impl TrackingService {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap();

        Self {
            client,
            api_url: config.mirror_api_url.clone(),
            token: config.mirror_token.clone(),
            version: config.mirror_api_version.clone(),
            tracking_db_id: config.mirror_tracking_db_id.clone(),
        }
    }

    pub async fn log_conversion(
        &self,
        user_id: &str,
        file_count: i64,
        domain: &str,
        event_count: i64,
        duration_ms: i64,
    ) {
        self.log_event(
            "conversion",
            user_id,
            "Success",
            file_count,
            event_count,
            duration_ms,
            None,
            domain,
        )
        .await;
    }

    pub async fn log_conversion_error(
        &self,
        user_id: &str,
        file_count: i64,
        error_message: &str,
        duration_ms: i64,
        domain: &str,
    ) {
        self.log_event(
            "conversion",
            user_id,
            "Error",
            file_count,
            0,
            duration_ms,
            Some(error_message),
            domain,
        )
        .await;
    }

    pub async fn log_quota_exceeded(
        &self,
        user_id: &str,
        usage_count: i64,
        limit: i64,
        plan: &str,
        domain: &str,
    ) {
        let error_message = format!("Quota exceeded: {}/{} (plan: {})", usage_count, limit, plan);
        self.log_event(
            "quota_exceeded",
            user_id,
            "Error",
            usage_count,
            limit,
            0,
            Some(&error_message),
            domain,
        )
        .await;
    }

    /// Sums file and event counts over successful conversions. Returns
    /// zeros when tracking is unconfigured or the query fails.
    pub async fn statistics(&self) -> Statistics {
        let Some(database_id) = self.database_id() else {
            return Statistics::default();
        };

        let body = json!({
            "filter": {
                "and": [
                    { "property": "Action", "title": { "equals": "conversion" } },
                    { "property": "Status", "select": { "equals": "Success" } }
                ]
            }
        });
        let request = self
            .request(Method::POST, &format!("/v1/databases/{database_id}/query"))
            .json(&body);

        match self.send(request).await {
            Ok(response) => {
                let mut stats = Statistics::default();
                if let Some(results) = response.get("results").and_then(Value::as_array) {
                    for page in results {
                        let Some(properties) = page.get("properties") else {
                            continue;
                        };
                        stats.file_count += number_at(properties, "/File Count/number");
                        stats.event_count += number_at(properties, "/Event Count/number");
                    }
                }
                stats
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to fetch statistics from mirror");
                Statistics::default()
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_event(
        &self,
        action: &str,
        user_id: &str,
        status: &str,
        file_count: i64,
        event_count: i64,
        duration_ms: i64,
        error_message: Option<&str>,
        domain: &str,
    ) {
        let Some(database_id) = self.database_id() else {
            tracing::debug!("tracking disabled, skipping usage event");
            return;
        };

        let mut properties = json!({
            "Action": { "title": [{ "text": { "content": action } }] },
            "User ID": { "rich_text": [{ "text": { "content": user_id } }] },
            "Timestamp": { "date": { "start": Utc::now().to_rfc3339() } },
            "Status": { "select": { "name": status } },
            "Domain": { "rich_text": [{ "text": { "content": domain } }] },
            "File Count": { "number": file_count },
            "Event Count": { "number": event_count },
            "Duration (ms)": { "number": duration_ms },
        });
        if let Some(message) = error_message {
            let truncated: String = message.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
            properties["Error Message"] =
                json!({ "rich_text": [{ "text": { "content": truncated } }] });
        }

        let request = self.request(Method::POST, "/v1/pages").json(&json!({
            "parent": { "type": "database_id", "database_id": database_id },
            "properties": properties,
        }));
        match self.send(request).await {
            Ok(_) => tracing::info!(action, user_id, "logged usage event"),
            Err(err) => tracing::warn!(error = %err, "failed to log usage event to mirror"),
        }
    }

    fn database_id(&self) -> Option<&str> {
        if self.token.is_empty() {
            return None;
        }
        self.tracking_db_id.as_deref()
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .header("Notion-Version", &self.version)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, String> {
        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("mirror returned {status}"));
        }
        response.json().await.map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub file_count: i64,
    pub event_count: i64,
}

fn number_at(value: &Value, pointer: &str) -> i64 {
    match value.pointer(pointer) {
        Some(v) => v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)).unwrap_or(0),
        None => 0,
    }
}
