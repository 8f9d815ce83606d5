use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Config;
use crate::errors::{AppError, Result};
use crate::models::convert::ConvertRequest;
use crate::services::token_cache::{FreshToken, TokenCache};

const TOKEN_SCOPE: &str = "https://www.googleapis.com/auth/generative-language";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Turns uploaded calendar images into an ICS document via a hosted
/// generative model. Authenticates with a service-account assertion
/// and caches the resulting bearer token.
#[derive(Clone)]
pub struct ExtractionService {
    client: Client,
    api_url: String,
    model: String,
    system_prompt: String,
    base_message: String,
    credentials_json: Option<String>,
    token_cache: Arc<TokenCache>,
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

impl ExtractionService {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap();

        Self {
            client,
            api_url: config.extraction_api_url.clone(),
            model: config.extraction_model.clone(),
            system_prompt: config.extraction_system_prompt.clone(),
            base_message: config.extraction_base_message.clone(),
            credentials_json: config.extraction_credentials_json.clone(),
            token_cache: Arc::new(TokenCache::new()),
        }
    }

    pub async fn generate_ics(&self, request: &ConvertRequest) -> Result<String> {
        let token = self
            .token_cache
            .get_or_refresh(|| self.fetch_access_token())
            .await?;

        let today = request
            .current_date
            .clone()
            .unwrap_or_else(|| Utc::now().date_naive().to_string());
        let time_zone = request.time_zone.as_deref().unwrap_or("UTC");
        let base_message = self
            .base_message
            .replace("{today}", &today)
            .replace("{tz}", time_zone);
        let user_prompt = format!("{}\n\n{}", self.system_prompt, base_message);

        let mut parts = vec![json!({ "text": user_prompt })];
        for file in &request.files {
            let Some(data_url) = file.data_url.as_deref().or(file.url.as_deref()) else {
                continue;
            };
            if let Some((mime_type, data)) = parse_data_url(data_url) {
                parts.push(json!({
                    "inline_data": { "mime_type": mime_type, "data": data }
                }));
            } else if let Some(url) = &file.url {
                tracing::warn!(url, "url-based image files are not supported yet, skipping");
            }
        }

        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": { "temperature": 0.1, "maxOutputTokens": 8192 },
        });

        tracing::info!(model = %self.model, "calling extraction model");
        let url = format!("{}/v1beta/models/{}:generateContent", self.api_url, self.model);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalService {
                service: "Gemini".to_string(),
                message: format!("request failed: {e}"),
            })?;

        let status = response.status();
        let payload: Value = response.json().await.map_err(|e| AppError::ExternalService {
            service: "Gemini".to_string(),
            message: format!("invalid response body: {e}"),
        })?;

        if let Some(error) = payload.get("error") {
            return Err(AppError::ExternalService {
                service: "Gemini".to_string(),
                message: format!("API error: {error}"),
            });
        }
        if !status.is_success() {
            return Err(AppError::ExternalService {
                service: "Gemini".to_string(),
                message: format!("API returned {status}"),
            });
        }

        let candidate = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first());
        if let Some(candidate) = candidate {
            if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
                if reason != "STOP" {
                    tracing::warn!(reason, "extraction response was blocked or incomplete");
                    return Err(AppError::Processing(format!(
                        "Content generation was blocked or incomplete. \
                         Please try with different images. Reason: {reason}"
                    )));
                }
            }
            if let Some(text) = candidate
                .pointer("/content/parts/0/text")
                .and_then(Value::as_str)
            {
                return Ok(clean_ics(text));
            }
        }

        tracing::error!(response = %payload, "extraction response did not contain expected content");
        Err(AppError::Processing(
            "The model returned an unexpected response format".to_string(),
        ))
    }

    async fn fetch_access_token(&self) -> Result<FreshToken> {
        let raw = self.credentials_json.as_deref().ok_or_else(|| {
            AppError::Config("extraction credentials not configured".to_string())
        })?;
        let key: ServiceAccountKey = serde_json::from_str(raw)
            .map_err(|e| AppError::Config(format!("invalid extraction credentials: {e}")))?;

        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: TOKEN_SCOPE,
            aud: &key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| AppError::Config(format!("invalid service account private key: {e}")))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(|e| AppError::ExternalService {
                service: "Google Cloud".to_string(),
                message: format!("failed to sign token assertion: {e}"),
            })?;

        let response = self
            .client
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .send()
            .await
            .map_err(|e| AppError::ExternalService {
                service: "Google Cloud".to_string(),
                message: format!("token request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService {
                service: "Google Cloud".to_string(),
                message: format!("token endpoint returned {}", response.status()),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| AppError::ExternalService {
            service: "Google Cloud".to_string(),
            message: format!("invalid token response: {e}"),
        })?;
        Ok(FreshToken {
            value: token.access_token,
            expires_in_secs: token.expires_in,
        })
    }
}

/// Splits `data:<mime>;base64,<payload>` into mime type and payload.
fn parse_data_url(value: &str) -> Option<(&str, &str)> {
    let rest = value.strip_prefix("data:")?;
    let (mime_type, data) = rest.split_once(";base64,")?;
    if mime_type.is_empty() || data.is_empty() {
        return None;
    }
    Some((mime_type, data))
}

/// Strips markdown code fences the model sometimes wraps around its
/// output.
fn clean_ics(text: &str) -> String {
    text.replace("```ics", "")
        .replace("```", "")
        .trim()
        .to_string()
}
