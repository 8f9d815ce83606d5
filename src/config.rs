use anyhow::Result;
use serde::Deserialize;
use std::env;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a calendar extraction assistant. Extract every \
event visible in the provided images and return one valid iCalendar (RFC 5545) document. \
Respond with the raw ICS content only, no commentary and no code fences.";

const DEFAULT_BASE_MESSAGE: &str = "Today's date is {today} and the user's timezone is {tz}. \
Resolve relative dates against today and emit times in the user's timezone.";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub store_backend: String,
    pub database_url: String,
    pub mirror_api_url: String,
    pub mirror_token: String,
    pub mirror_api_version: String,
    pub mirror_quota_db_id: Option<String>,
    pub mirror_tracking_db_id: Option<String>,
    pub extraction_api_url: String,
    pub extraction_model: String,
    pub extraction_credentials_json: Option<String>,
    pub extraction_system_prompt: String,
    pub extraction_base_message: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            store_backend: env::var("STORE_BACKEND")
                .unwrap_or_else(|_| "postgres".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/calendar_extraction".to_string()),
            mirror_api_url: env::var("MIRROR_API_URL")
                .unwrap_or_else(|_| "https://api.notion.com".to_string()),
            mirror_token: env::var("MIRROR_TOKEN").unwrap_or_default(),
            mirror_api_version: env::var("MIRROR_API_VERSION")
                .unwrap_or_else(|_| "2022-06-28".to_string()),
            mirror_quota_db_id: non_empty(env::var("MIRROR_QUOTA_DB_ID").ok()),
            mirror_tracking_db_id: non_empty(env::var("MIRROR_TRACKING_DB_ID").ok()),
            extraction_api_url: env::var("EXTRACTION_API_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string()),
            extraction_model: env::var("EXTRACTION_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
            extraction_credentials_json: non_empty(env::var("EXTRACTION_CREDENTIALS_JSON").ok()),
            extraction_system_prompt: env::var("EXTRACTION_SYSTEM_PROMPT")
                .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string()),
            extraction_base_message: env::var("EXTRACTION_BASE_MESSAGE")
                .unwrap_or_else(|_| DEFAULT_BASE_MESSAGE.to_string()),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "PORT",
        "STORE_BACKEND",
        "DATABASE_URL",
        "MIRROR_API_URL",
        "MIRROR_TOKEN",
        "MIRROR_API_VERSION",
        "MIRROR_QUOTA_DB_ID",
        "MIRROR_TRACKING_DB_ID",
        "EXTRACTION_API_URL",
        "EXTRACTION_MODEL",
        "EXTRACTION_CREDENTIALS_JSON",
        "EXTRACTION_SYSTEM_PROMPT",
        "EXTRACTION_BASE_MESSAGE",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_nothing_is_set() {
        clear_env();
        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.store_backend, "postgres");
        assert_eq!(config.mirror_api_url, "https://api.notion.com");
        assert_eq!(config.mirror_api_version, "2022-06-28");
        assert!(config.mirror_token.is_empty());
        assert!(config.mirror_quota_db_id.is_none());
        assert!(config.extraction_credentials_json.is_none());
        assert!(config.extraction_base_message.contains("{today}"));
    }

    #[test]
    #[serial]
    fn environment_overrides_defaults() {
        clear_env();
        env::set_var("PORT", "8081");
        env::set_var("STORE_BACKEND", "memory");
        env::set_var("MIRROR_QUOTA_DB_ID", "db-123");
        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 8081);
        assert_eq!(config.store_backend, "memory");
        assert_eq!(config.mirror_quota_db_id.as_deref(), Some("db-123"));
        clear_env();
    }

    #[test]
    #[serial]
    fn blank_mirror_database_id_counts_as_unset() {
        clear_env();
        env::set_var("MIRROR_QUOTA_DB_ID", "   ");
        let config = Config::from_env().unwrap();
        assert!(config.mirror_quota_db_id.is_none());
        clear_env();
    }
}
