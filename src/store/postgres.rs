use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{QuotaStore, StoreError, StoreResult};
use crate::models::plan::{ParsedPlan, PlanTier, DEFAULT_PLAN};
use crate::models::quota::{is_new_period, UserQuota, UserQuotaPatch};

const SELECT_COLUMNS: &str =
    "plan, quota_used, quota_limit, period_start, created_at, updated_at";

pub struct PgQuotaStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct QuotaRow {
    user_id: String,
    #[sqlx(flatten)]
    record: UserQuota,
}

impl PgQuotaStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn rollover_tier(user_id: &str, plan: &str) -> PlanTier {
        match PlanTier::parse(plan) {
            ParsedPlan::Known(tier) => tier,
            ParsedPlan::Unknown(raw) => {
                tracing::warn!(user_id, plan = %raw, "unknown plan on period rollover, using FREE");
                DEFAULT_PLAN
            }
        }
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    async fn get(&self, user_id: &str) -> StoreResult<Option<UserQuota>> {
        let record = sqlx::query_as::<_, UserQuota>(&format!(
            "SELECT {SELECT_COLUMNS} FROM user_quotas WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn put(&self, user_id: &str, record: &UserQuota) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO user_quotas \
                 (user_id, plan, quota_used, quota_limit, period_start, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id) DO UPDATE SET \
                 plan = EXCLUDED.plan, \
                 quota_used = EXCLUDED.quota_used, \
                 quota_limit = EXCLUDED.quota_limit, \
                 period_start = EXCLUDED.period_start, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(user_id)
        .bind(&record.plan)
        .bind(record.quota_used)
        .bind(record.quota_limit)
        .bind(record.period_start)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_usage(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<UserQuota> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, UserQuota>(&format!(
            "SELECT {SELECT_COLUMNS} FROM user_quotas WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let record = match existing {
            None => {
                let record = UserQuota::fresh(DEFAULT_PLAN, 1, now);
                sqlx::query(
                    "INSERT INTO user_quotas \
                         (user_id, plan, quota_used, quota_limit, period_start, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(user_id)
                .bind(&record.plan)
                .bind(record.quota_used)
                .bind(record.quota_limit)
                .bind(record.period_start)
                .bind(record.created_at)
                .bind(record.updated_at)
                .execute(&mut *tx)
                .await?;
                record
            }
            Some(mut record) => {
                // Staleness is re-checked under the row lock so a count
                // belonging to the previous period is never incremented.
                if is_new_period(record.period_start, now) {
                    let tier = Self::rollover_tier(user_id, &record.plan);
                    record.quota_used = 1;
                    record.quota_limit = tier.monthly_limit();
                    record.period_start = now;
                } else {
                    record.quota_used += 1;
                }
                record.updated_at = now;
                sqlx::query(
                    "UPDATE user_quotas SET \
                         quota_used = $2, quota_limit = $3, period_start = $4, updated_at = $5 \
                     WHERE user_id = $1",
                )
                .bind(user_id)
                .bind(record.quota_used)
                .bind(record.quota_limit)
                .bind(record.period_start)
                .bind(record.updated_at)
                .execute(&mut *tx)
                .await?;
                record
            }
        };

        tx.commit().await?;
        Ok(record)
    }

    async fn reset_period(
        &self,
        user_id: &str,
        new_limit: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE user_quotas SET \
                 quota_used = 0, quota_limit = $2, period_start = $3, updated_at = $3 \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(new_limit)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_all(&self) -> StoreResult<Vec<(String, UserQuota)>> {
        let rows = sqlx::query_as::<_, QuotaRow>(&format!(
            "SELECT user_id, {SELECT_COLUMNS} FROM user_quotas ORDER BY user_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| (row.user_id, row.record)).collect())
    }

    async fn upsert_merge(
        &self,
        user_id: &str,
        patch: UserQuotaPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<UserQuota> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, UserQuota>(&format!(
            "SELECT {SELECT_COLUMNS} FROM user_quotas WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut record = existing.unwrap_or_else(|| UserQuota::fresh(DEFAULT_PLAN, 0, now));
        if let Some(plan) = patch.plan {
            record.plan = plan;
        }
        if let Some(quota_used) = patch.quota_used {
            record.quota_used = quota_used;
        }
        if let Some(quota_limit) = patch.quota_limit {
            record.quota_limit = quota_limit;
        }
        if let Some(period_start) = patch.period_start {
            record.period_start = period_start;
        }
        record.updated_at = now;

        sqlx::query(
            "INSERT INTO user_quotas \
                 (user_id, plan, quota_used, quota_limit, period_start, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id) DO UPDATE SET \
                 plan = EXCLUDED.plan, \
                 quota_used = EXCLUDED.quota_used, \
                 quota_limit = EXCLUDED.quota_limit, \
                 period_start = EXCLUDED.period_start, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(user_id)
        .bind(&record.plan)
        .bind(record.quota_used)
        .bind(record.quota_limit)
        .bind(record.period_start)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn delete(&self, user_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM user_quotas WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
