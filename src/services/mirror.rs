use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use serde_json::{json, Value};

use crate::config::Config;
use crate::models::plan::PlanTier;
use crate::services::metrics::MetricsService;

/// Client for the reporting mirror, a Notion database that shadows the
/// primary store. Every operation is best effort: failures are logged
/// and counted, never surfaced to callers.
#[derive(Clone)]
pub struct QuotaMirror {
    client: Client,
    api_url: String,
    token: String,
    version: String,
    quota_db_id: Option<String>,
    metrics: Arc<MetricsService>,
}

impl QuotaMirror {
    pub fn new(config: &Config, metrics: Arc<MetricsService>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap();

        Self {
            client,
            api_url: config.mirror_api_url.clone(),
            token: config.mirror_token.clone(),
            version: config.mirror_api_version.clone(),
            quota_db_id: config.mirror_quota_db_id.clone(),
            metrics,
        }
    }

    pub fn enabled(&self) -> bool {
        self.database_id().is_some()
    }

    /// Replicates one record to the mirror, creating or updating its
    /// page. No-op when the mirror is not configured.
    pub async fn sync_user(
        &self,
        user_id: &str,
        quota_used: i64,
        plan: PlanTier,
        period_start: DateTime<Utc>,
    ) {
        let Some(database_id) = self.database_id().map(str::to_string) else {
            return;
        };

        match self
            .try_sync_user(&database_id, user_id, quota_used, plan, period_start)
            .await
        {
            Ok(op) => tracing::info!(user_id, op, "synced quota to mirror"),
            Err(err) => {
                self.metrics.record_mirror_sync_failure();
                tracing::warn!(user_id, error = %err, "failed to sync quota to mirror");
            }
        }
    }

    /// Reads every row of the mirror database. Returns an empty list
    /// when the mirror is unconfigured or the read fails.
    pub async fn fetch_all(&self) -> Vec<MirrorQuotaRow> {
        let Some(database_id) = self.database_id() else {
            return Vec::new();
        };

        let request = self
            .request(Method::POST, &format!("/v1/databases/{database_id}/query"))
            .json(&json!({}));
        match self.send(request).await {
            Ok(body) => parse_rows(&body),
            Err(err) => {
                tracing::warn!(error = %err, "failed to fetch quota rows from mirror");
                Vec::new()
            }
        }
    }

    /// Archives the user's mirror page, if one exists.
    pub async fn archive_user(&self, user_id: &str) {
        if !self.enabled() {
            return;
        }

        match self.find_page(user_id).await {
            Ok(Some(page_id)) => {
                let request = self
                    .request(Method::PATCH, &format!("/v1/pages/{page_id}"))
                    .json(&json!({ "archived": true }));
                match self.send(request).await {
                    Ok(_) => tracing::info!(user_id, "archived quota page in mirror"),
                    Err(err) => {
                        self.metrics.record_mirror_sync_failure();
                        tracing::warn!(user_id, error = %err, "failed to archive quota page in mirror");
                    }
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(user_id, error = %err, "failed to look up quota page in mirror");
            }
        }
    }

    /// Liveness probe against the mirror API, used by readiness checks.
    pub async fn probe(&self) -> bool {
        if self.token.is_empty() {
            return false;
        }
        self.send(self.request(Method::GET, "/v1/users/me")).await.is_ok()
    }

    async fn try_sync_user(
        &self,
        database_id: &str,
        user_id: &str,
        quota_used: i64,
        plan: PlanTier,
        period_start: DateTime<Utc>,
    ) -> Result<&'static str, String> {
        let properties = quota_properties(user_id, quota_used, plan, period_start);

        // Lookup-then-write: two concurrent syncs for a user with no
        // page yet can both miss the lookup and create duplicates. The
        // mirror has no unique key, so bulk reconciliation tolerates
        // duplicate pages instead of preventing them here.
        match self.find_page(user_id).await? {
            Some(page_id) => {
                let request = self
                    .request(Method::PATCH, &format!("/v1/pages/{page_id}"))
                    .json(&json!({ "properties": properties }));
                self.send(request).await?;
                Ok("updated")
            }
            None => {
                let request = self.request(Method::POST, "/v1/pages").json(&json!({
                    "parent": { "database_id": database_id },
                    "properties": properties,
                }));
                self.send(request).await?;
                Ok("created")
            }
        }
    }

    async fn find_page(&self, user_id: &str) -> Result<Option<String>, String> {
        let database_id = self
            .database_id()
            .ok_or_else(|| "mirror database not configured".to_string())?;

        let request = self
            .request(Method::POST, &format!("/v1/databases/{database_id}/query"))
            .json(&json!({
                "filter": {
                    "property": "User ID",
                    "title": { "equals": user_id }
                }
            }));
        let body = self.send(request).await?;
        let page_id = body
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|page| page.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(page_id)
    }

    fn database_id(&self) -> Option<&str> {
        if self.token.is_empty() {
            return None;
        }
        self.quota_db_id.as_deref()
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

/// One quota row as stored in the mirror. `plan` is the raw select
/// value; consumers normalize it against the plan catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorQuotaRow {
    pub user_id: String,
    pub usage_count: i64,
    pub plan: String,
    pub last_reset: DateTime<Utc>,
}

fn quota_properties(
    user_id: &str,
    quota_used: i64,
    plan: PlanTier,
    period_start: DateTime<Utc>,
) -> Value {
    json!({
        "User ID": { "title": [{ "text": { "content": user_id } }] },
        "Usage Count": { "number": quota_used },
        "Last Reset": { "date": { "start": period_start.to_rfc3339() } },
        "Plan": { "select": { "name": plan.as_str() } },
    })
}

fn parse_rows(body: &Value) -> Vec<MirrorQuotaRow> {
    let Some(results) = body.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };
    results.iter().filter_map(parse_row).collect()
}

fn parse_row(page: &Value) -> Option<MirrorQuotaRow> {
    let properties = page.get("properties")?;
    let user_id = title_text(properties.get("User ID"))?;
    if user_id.is_empty() {
        return None;
    }

    Some(MirrorQuotaRow {
        user_id,
        usage_count: properties
            .get("Usage Count")
            .and_then(number_value)
            .unwrap_or(0),
        plan: properties
            .get("Plan")
            .and_then(select_name)
            .unwrap_or_default(),
        last_reset: properties
            .get("Last Reset")
            .and_then(date_start)
            .and_then(|start| DateTime::parse_from_rfc3339(&start).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
    })
}

fn title_text(property: Option<&Value>) -> Option<String> {
    let fragments = property?.get("title")?.as_array()?;
    Some(
        fragments
            .iter()
            .filter_map(|fragment| fragment.pointer("/text/content").and_then(Value::as_str))
            .collect(),
    )
}

fn number_value(property: &Value) -> Option<i64> {
    let number = property.get("number")?;
    number.as_i64().or_else(|| number.as_f64().map(|n| n as i64))
}

fn select_name(property: &Value) -> Option<String> {
    property
        .pointer("/select/name")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn date_start(property: &Value) -> Option<String> {
    property
        .pointer("/date/start")
        .and_then(Value::as_str)
        .map(str::to_string)
}
