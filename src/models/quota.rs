use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::plan::PlanTier;

/// Monthly quota record for a single user. The wire shape uses
/// camelCase field names; the row shape matches the user_quotas table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserQuota {
    pub plan: String,
    pub quota_used: i64,
    pub quota_limit: i64,
    pub period_start: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserQuota {
    /// A record whose period starts now, with the limit taken from the
    /// plan catalog.
    pub fn fresh(plan: PlanTier, quota_used: i64, now: DateTime<Utc>) -> Self {
        Self {
            plan: plan.as_str().to_string(),
            quota_used,
            quota_limit: plan.monthly_limit(),
            period_start: now,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a quota record. Absent fields keep their stored
/// values.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserQuotaPatch {
    pub plan: Option<String>,
    pub quota_used: Option<i64>,
    pub quota_limit: Option<i64>,
    pub period_start: Option<DateTime<Utc>>,
}

/// True when `period_start` falls in an earlier UTC calendar month
/// than `now`. Both sides are compared by (year, month) only, so a
/// record from January 31 is stale on February 1.
pub fn is_new_period(period_start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    period_start.year() != now.year() || period_start.month() != now.month()
}
