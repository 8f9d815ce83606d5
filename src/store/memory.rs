use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{QuotaStore, StoreResult};
use crate::models::plan::{ParsedPlan, PlanTier, DEFAULT_PLAN};
use crate::models::quota::{is_new_period, UserQuota, UserQuotaPatch};

/// In-memory backend for local runs and tests. Mutations go through
/// the dashmap entry API, so per-user updates are atomic without an
/// outer lock.
#[derive(Default)]
pub struct MemoryQuotaStore {
    records: DashMap<String, UserQuota>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn get(&self, user_id: &str) -> StoreResult<Option<UserQuota>> {
        Ok(self.records.get(user_id).map(|entry| entry.clone()))
    }

    async fn put(&self, user_id: &str, record: &UserQuota) -> StoreResult<()> {
        self.records.insert(user_id.to_string(), record.clone());
        Ok(())
    }

    async fn increment_usage(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<UserQuota> {
        let mut entry = self
            .records
            .entry(user_id.to_string())
            .or_insert_with(|| UserQuota::fresh(DEFAULT_PLAN, 0, now));
        let record = entry.value_mut();
        if is_new_period(record.period_start, now) {
            let tier = match PlanTier::parse(&record.plan) {
                ParsedPlan::Known(tier) => tier,
                ParsedPlan::Unknown(raw) => {
                    tracing::warn!(user_id, plan = %raw, "unknown plan on period rollover, using FREE");
                    DEFAULT_PLAN
                }
            };
            record.quota_used = 1;
            record.quota_limit = tier.monthly_limit();
            record.period_start = now;
        } else {
            record.quota_used += 1;
        }
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn reset_period(
        &self,
        user_id: &str,
        new_limit: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        if let Some(mut entry) = self.records.get_mut(user_id) {
            let record = entry.value_mut();
            record.quota_used = 0;
            record.quota_limit = new_limit;
            record.period_start = now;
            record.updated_at = now;
        }
        Ok(())
    }

    async fn list_all(&self) -> StoreResult<Vec<(String, UserQuota)>> {
        let mut rows: Vec<(String, UserQuota)> = self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }

    async fn upsert_merge(
        &self,
        user_id: &str,
        patch: UserQuotaPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<UserQuota> {
        let mut entry = self
            .records
            .entry(user_id.to_string())
            .or_insert_with(|| UserQuota::fresh(DEFAULT_PLAN, 0, now));
        let record = entry.value_mut();
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
        Ok(record.clone())
    }

    async fn delete(&self, user_id: &str) -> StoreResult<()> {
        self.records.remove(user_id);
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 9, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn increment_creates_missing_record_with_count_one() {
        let store = MemoryQuotaStore::new();
        let record = store.increment_usage("u-1", utc(2024, 6, 1)).await.unwrap();
        assert_eq!(record.quota_used, 1);
        assert_eq!(record.plan, "FREE");
        assert_eq!(record.quota_limit, 10);
    }

    #[tokio::test]
    async fn increment_restarts_a_stale_period_instead_of_adding_to_it() {
        let store = MemoryQuotaStore::new();
        let old = UserQuota::fresh(PlanTier::Pro, 7, utc(2024, 4, 20));
        store.put("u-1", &old).await.unwrap();

        let record = store.increment_usage("u-1", utc(2024, 6, 1)).await.unwrap();
        assert_eq!(record.quota_used, 1);
        assert_eq!(record.quota_limit, 100);
        assert_eq!(record.period_start, utc(2024, 6, 1));
    }

    #[tokio::test]
    async fn merge_keeps_unpatched_fields() {
        let store = MemoryQuotaStore::new();
        let original = UserQuota::fresh(PlanTier::Free, 4, utc(2024, 6, 1));
        store.put("u-1", &original).await.unwrap();

        let patch = UserQuotaPatch {
            plan: Some("PRO".to_string()),
            ..Default::default()
        };
        let merged = store.upsert_merge("u-1", patch, utc(2024, 6, 2)).await.unwrap();
        assert_eq!(merged.plan, "PRO");
        assert_eq!(merged.quota_used, 4);
        assert_eq!(merged.period_start, original.period_start);
        assert_eq!(merged.created_at, original.created_at);
        assert_eq!(merged.updated_at, utc(2024, 6, 2));
    }

    #[tokio::test]
    async fn reset_period_is_a_no_op_for_missing_users() {
        let store = MemoryQuotaStore::new();
        store.reset_period("ghost", 10, utc(2024, 6, 1)).await.unwrap();
        assert!(store.get("ghost").await.unwrap().is_none());
    }
}
