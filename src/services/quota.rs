use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::plan::{ParsedPlan, PlanTier, DEFAULT_PLAN};
use crate::models::quota::{is_new_period, UserQuota, UserQuotaPatch};
use crate::services::metrics::MetricsService;
use crate::services::mirror::QuotaMirror;
use crate::store::{QuotaStore, StoreResult};

/// Orchestrates quota decisions over the primary store and keeps the
/// reporting mirror loosely in step. Availability beats strictness
/// throughout: a failing store never blocks a conversion.
#[derive(Clone)]
pub struct QuotaService {
    store: Arc<dyn QuotaStore>,
    mirror: QuotaMirror,
    metrics: Arc<MetricsService>,
}

impl QuotaService {
    pub fn new(store: Arc<dyn QuotaStore>, mirror: QuotaMirror, metrics: Arc<MetricsService>) -> Self {
        Self {
            store,
            mirror,
            metrics,
        }
    }

    /// Decides whether the user may convert right now. Creates the
    /// record on first contact and rolls a stale period over before
    /// evaluating. On store failure the request is allowed with
    /// sentinel values, so quota enforcement degrades to open.
    pub async fn check_quota(&self, user_id: &str) -> QuotaCheckResult {
        match self.evaluate_quota(user_id).await {
            Ok(result) => {
                let outcome = if result.allowed { "allowed" } else { "denied" };
                self.metrics.record_quota_check(outcome);
                result
            }
            Err(err) => {
                tracing::error!(user_id, error = %err, "quota check failed, allowing request");
                self.metrics.record_quota_check("fail_open");
                QuotaCheckResult {
                    allowed: true,
                    remaining: -1,
                    limit: -1,
                    plan: DEFAULT_PLAN,
                }
            }
        }
    }

    /// Records one committed conversion. Store errors are logged and
    /// swallowed; a successful write schedules mirror replication off
    /// the request path.
    pub async fn increment_usage(&self, user_id: &str) {
        match self.store.increment_usage(user_id, Utc::now()).await {
            Ok(record) => {
                tracing::info!(user_id, quota_used = record.quota_used, "incremented usage");
                self.metrics.record_usage_increment();
                self.push_to_mirror(user_id, &record);
            }
            Err(err) => {
                tracing::error!(user_id, error = %err, "failed to increment usage");
            }
        }
    }

    /// Read-only view of a user's record. A stale period is shown as
    /// zero usage without writing anything; the persisted reset
    /// happens on the next check or increment.
    pub async fn get_status(&self, user_id: &str) -> Option<UserQuota> {
        match self.store.get(user_id).await {
            Ok(Some(mut record)) => {
                if is_new_period(record.period_start, Utc::now()) {
                    record.quota_used = 0;
                }
                Some(record)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::error!(user_id, error = %err, "failed to read quota status");
                None
            }
        }
    }

    pub async fn find_all(&self) -> Vec<UserQuotaEntry> {
        match self.store.list_all().await {
            Ok(rows) => rows
                .into_iter()
                .map(|(user_id, quota)| UserQuotaEntry { user_id, quota })
                .collect(),
            Err(err) => {
                tracing::error!(error = %err, "failed to list quota records");
                Vec::new()
            }
        }
    }

    /// Merges the patch into the stored record (creating it when
    /// absent) and pushes the result to the mirror. Errors are logged
    /// and swallowed.
    pub async fn update_record(&self, user_id: &str, patch: UserQuotaPatch) {
        match self.store.upsert_merge(user_id, patch, Utc::now()).await {
            Ok(record) => {
                tracing::info!(user_id, "updated quota record");
                let plan = self.tier_of(user_id, &record.plan);
                self.mirror
                    .sync_user(user_id, record.quota_used, plan, record.period_start)
                    .await;
            }
            Err(err) => {
                tracing::error!(user_id, error = %err, "failed to update quota record");
            }
        }
    }

    pub async fn delete_record(&self, user_id: &str) {
        match self.store.delete(user_id).await {
            Ok(()) => {
                tracing::info!(user_id, "deleted quota record");
                self.mirror.archive_user(user_id).await;
            }
            Err(err) => {
                tracing::error!(user_id, error = %err, "failed to delete quota record");
            }
        }
    }

    /// Replicates primary records to the mirror, one user at a time.
    /// An empty or absent id list means every record. Returns the
    /// number of records attempted.
    pub async fn sync_to_mirror(&self, user_ids: Option<Vec<String>>) -> usize {
        let entries = self.find_all().await;
        let selected: Vec<UserQuotaEntry> = match &user_ids {
            Some(ids) if !ids.is_empty() => entries
                .into_iter()
                .filter(|entry| ids.contains(&entry.user_id))
                .collect(),
            _ => entries,
        };

        tracing::info!(count = selected.len(), "starting quota sync to mirror");
        for entry in &selected {
            let plan = self.tier_of(&entry.user_id, &entry.quota.plan);
            self.mirror
                .sync_user(
                    &entry.user_id,
                    entry.quota.quota_used,
                    plan,
                    entry.quota.period_start,
                )
                .await;
        }
        tracing::info!(count = selected.len(), "completed quota sync to mirror");
        selected.len()
    }

    /// Restores primary records from the mirror. Mirror state wins:
    /// whatever the mirror holds overwrites the primary row, with the
    /// limit recomputed from the mirrored plan. Per-record failures
    /// are logged and do not stop the batch. Returns the number of
    /// records applied.
    pub async fn sync_from_mirror(&self, user_ids: Option<Vec<String>>) -> usize {
        let rows = self.mirror.fetch_all().await;
        let selected: Vec<_> = match &user_ids {
            Some(ids) if !ids.is_empty() => rows
                .into_iter()
                .filter(|row| ids.contains(&row.user_id))
                .collect(),
            _ => rows,
        };

        tracing::info!(count = selected.len(), "starting quota sync from mirror");
        let mut applied = 0;
        for row in &selected {
            let plan = self.tier_of(&row.user_id, &row.plan);
            let patch = UserQuotaPatch {
                plan: Some(plan.as_str().to_string()),
                quota_used: Some(row.usage_count),
                quota_limit: Some(plan.monthly_limit()),
                period_start: Some(row.last_reset),
            };
            match self.store.upsert_merge(&row.user_id, patch, Utc::now()).await {
                Ok(_) => {
                    applied += 1;
                    tracing::info!(user_id = %row.user_id, "applied mirror record");
                }
                Err(err) => {
                    tracing::warn!(user_id = %row.user_id, error = %err, "failed to apply mirror record");
                }
            }
        }
        tracing::info!(applied, "completed quota sync from mirror");
        applied
    }

    async fn evaluate_quota(&self, user_id: &str) -> StoreResult<QuotaCheckResult> {
        let now = Utc::now();
        let Some(record) = self.store.get(user_id).await? else {
            let record = UserQuota::fresh(DEFAULT_PLAN, 0, now);
            self.store.put(user_id, &record).await?;
            tracing::info!(user_id, "created quota record");
            return Ok(QuotaCheckResult {
                allowed: true,
                remaining: record.quota_limit,
                limit: record.quota_limit,
                plan: DEFAULT_PLAN,
            });
        };

        let plan = self.tier_of(user_id, &record.plan);
        let limit = plan.monthly_limit();
        let mut quota_used = record.quota_used;
        if is_new_period(record.period_start, now) {
            self.store.reset_period(user_id, limit, now).await?;
            tracing::info!(user_id, "started new quota period");
            quota_used = 0;
        }

        Ok(QuotaCheckResult {
            allowed: quota_used < limit,
            remaining: (limit - quota_used).max(0),
            limit,
            plan,
        })
    }

    fn push_to_mirror(&self, user_id: &str, record: &UserQuota) {
        if !self.mirror.enabled() {
            return;
        }
        let mirror = self.mirror.clone();
        let user_id = user_id.to_string();
        let plan = self.tier_of(&user_id, &record.plan);
        let quota_used = record.quota_used;
        let period_start = record.period_start;
        tokio::spawn(async move {
            mirror
                .sync_user(&user_id, quota_used, plan, period_start)
                .await;
        });
    }

    fn tier_of(&self, user_id: &str, plan: &str) -> PlanTier {
        match PlanTier::parse(plan) {
            ParsedPlan::Known(tier) => tier,
            ParsedPlan::Unknown(raw) => {
                tracing::warn!(user_id, plan = %raw, "unknown plan value, treating as FREE");
                DEFAULT_PLAN
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCheckResult {
    pub allowed: bool,
    pub remaining: i64,
    pub limit: i64,
    pub plan: PlanTier,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserQuotaEntry {
    pub user_id: String,
    pub quota: UserQuota,
}
