use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::Config;
use crate::errors::{AppError, Result};
use crate::models::quota::{UserQuota, UserQuotaPatch};

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("quota store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Transactional record store backing the quota service. Callers treat
/// every method as fallible; availability policy (fail open, swallow,
/// or surface) is decided above this trait.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn get(&self, user_id: &str) -> StoreResult<Option<UserQuota>>;

    /// Full overwrite. Last writer wins; callers needing
    /// create-if-absent semantics use `increment_usage` or
    /// `upsert_merge` instead.
    async fn put(&self, user_id: &str, record: &UserQuota) -> StoreResult<()>;

    /// Adds one conversion to the user's count inside a single
    /// transaction. Creates the record (count 1, default plan) when
    /// absent, and restarts the period first when `period_start` is
    /// stale relative to `now` so the pre-reset counter is never
    /// incremented.
    async fn increment_usage(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<UserQuota>;

    /// Starts a new period: count 0, `period_start = now`, limit set
    /// to `new_limit`. No-op when the record does not exist.
    async fn reset_period(
        &self,
        user_id: &str,
        new_limit: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn list_all(&self) -> StoreResult<Vec<(String, UserQuota)>>;

    /// Read-modify-write merge of the given fields, creating the
    /// record when absent. Returns the merged record.
    async fn upsert_merge(
        &self,
        user_id: &str,
        patch: UserQuotaPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<UserQuota>;

    async fn delete(&self, user_id: &str) -> StoreResult<()>;

    async fn ping(&self) -> StoreResult<()>;
}

pub async fn create_store(config: &Config) -> Result<Arc<dyn QuotaStore>> {
    match config.store_backend.as_str() {
        "postgres" => {
            let store = postgres::PgQuotaStore::connect(&config.database_url).await?;
            store.run_migrations().await?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(memory::MemoryQuotaStore::new())),
        other => Err(AppError::Config(format!(
            "Unsupported store backend: {}",
            other
        ))),
    }
}
