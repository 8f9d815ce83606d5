use std::sync::Arc;

use async_trait::async_trait;
use calendar_extraction_server::config::Config;
use calendar_extraction_server::models::plan::PlanTier;
use calendar_extraction_server::models::quota::{UserQuota, UserQuotaPatch};
use calendar_extraction_server::services::metrics::MetricsService;
use calendar_extraction_server::services::mirror::QuotaMirror;
use calendar_extraction_server::services::quota::QuotaService;
use calendar_extraction_server::store::memory::MemoryQuotaStore;
use calendar_extraction_server::store::{QuotaStore, StoreError, StoreResult};
use chrono::{DateTime, Datelike, Duration, Utc};

fn offline_config() -> Config {
    Config {
        port: 0,
        store_backend: "memory".to_string(),
        database_url: String::new(),
        mirror_api_url: "http://127.0.0.1:1".to_string(),
        mirror_token: String::new(),
        mirror_api_version: "2022-06-28".to_string(),
        mirror_quota_db_id: None,
        mirror_tracking_db_id: None,
        extraction_api_url: "http://127.0.0.1:1".to_string(),
        extraction_model: "test-model".to_string(),
        extraction_credentials_json: None,
        extraction_system_prompt: "extract".to_string(),
        extraction_base_message: "today {today} tz {tz}".to_string(),
    }
}

fn service_over(store: Arc<dyn QuotaStore>) -> QuotaService {
    let metrics = Arc::new(MetricsService::new());
    let mirror = QuotaMirror::new(&offline_config(), metrics.clone());
    QuotaService::new(store, mirror, metrics)
}

fn record(plan: &str, used: i64, limit: i64, period_start: DateTime<Utc>) -> UserQuota {
    UserQuota {
        plan: plan.to_string(),
        quota_used: used,
        quota_limit: limit,
        period_start,
        created_at: period_start,
        updated_at: period_start,
    }
}

fn two_months_ago() -> DateTime<Utc> {
    Utc::now() - Duration::days(62)
}

struct FailingStore;

fn outage() -> StoreError {
    StoreError::Unavailable("injected outage".to_string())
}

#[async_trait]
impl QuotaStore for FailingStore {
    async fn get(&self, _user_id: &str) -> StoreResult<Option<UserQuota>> {
        Err(outage())
    }

    async fn put(&self, _user_id: &str, _record: &UserQuota) -> StoreResult<()> {
        Err(outage())
    }

    async fn increment_usage(
        &self,
        _user_id: &str,
        _now: DateTime<Utc>,
    ) -> StoreResult<UserQuota> {
        Err(outage())
    }

    async fn reset_period(
        &self,
        _user_id: &str,
        _new_limit: i64,
        _now: DateTime<Utc>,
    ) -> StoreResult<()> {
        Err(outage())
    }

    async fn list_all(&self) -> StoreResult<Vec<(String, UserQuota)>> {
        Err(outage())
    }

    async fn upsert_merge(
        &self,
        _user_id: &str,
        _patch: UserQuotaPatch,
        _now: DateTime<Utc>,
    ) -> StoreResult<UserQuota> {
        Err(outage())
    }

    async fn delete(&self, _user_id: &str) -> StoreResult<()> {
        Err(outage())
    }

    async fn ping(&self) -> StoreResult<()> {
        Err(outage())
    }
}

#[tokio::test]
async fn first_check_creates_the_record_and_allows() {
    let store: Arc<dyn QuotaStore> = Arc::new(MemoryQuotaStore::new());
    let service = service_over(store.clone());

    let result = service.check_quota("fresh-user").await;
    assert!(result.allowed);
    assert_eq!(result.limit, 10);
    assert_eq!(result.remaining, 10);
    assert_eq!(result.plan, PlanTier::Free);

    let stored = store.get("fresh-user").await.unwrap().unwrap();
    assert_eq!(stored.plan, "FREE");
    assert_eq!(stored.quota_used, 0);
}

#[tokio::test]
async fn remaining_shrinks_as_usage_is_recorded() {
    let store: Arc<dyn QuotaStore> = Arc::new(MemoryQuotaStore::new());
    let service = service_over(store.clone());

    service.check_quota("u-1").await;
    for _ in 0..3 {
        service.increment_usage("u-1").await;
    }

    let result = service.check_quota("u-1").await;
    assert!(result.allowed);
    assert_eq!(result.remaining, 7);
}

#[tokio::test]
async fn denies_once_the_monthly_limit_is_reached() {
    let store: Arc<dyn QuotaStore> = Arc::new(MemoryQuotaStore::new());
    store
        .put("u-1", &record("FREE", 10, 10, Utc::now()))
        .await
        .unwrap();
    let service = service_over(store);

    let result = service.check_quota("u-1").await;
    assert!(!result.allowed);
    assert_eq!(result.remaining, 0);
    assert_eq!(result.limit, 10);
}

#[tokio::test]
async fn check_persists_the_reset_of_a_stale_period() {
    let store: Arc<dyn QuotaStore> = Arc::new(MemoryQuotaStore::new());
    store
        .put("u-1", &record("FREE", 10, 10, two_months_ago()))
        .await
        .unwrap();
    let service = service_over(store.clone());

    let result = service.check_quota("u-1").await;
    assert!(result.allowed);
    assert_eq!(result.remaining, 10);

    let stored = store.get("u-1").await.unwrap().unwrap();
    assert_eq!(stored.quota_used, 0);
    assert_eq!(stored.period_start.month(), Utc::now().month());
    assert_eq!(stored.period_start.year(), Utc::now().year());
}

#[tokio::test]
async fn status_shows_a_stale_period_as_zero_without_writing() {
    let store: Arc<dyn QuotaStore> = Arc::new(MemoryQuotaStore::new());
    let old_period = two_months_ago();
    store
        .put("u-1", &record("FREE", 9, 10, old_period))
        .await
        .unwrap();
    let service = service_over(store.clone());

    let status = service.get_status("u-1").await.unwrap();
    assert_eq!(status.quota_used, 0);

    let stored = store.get("u-1").await.unwrap().unwrap();
    assert_eq!(stored.quota_used, 9);
    assert_eq!(stored.period_start, old_period);
}

#[tokio::test]
async fn status_is_none_for_unknown_users() {
    let service = service_over(Arc::new(MemoryQuotaStore::new()));
    assert!(service.get_status("nobody").await.is_none());
}

#[tokio::test]
async fn unknown_plans_fall_back_to_the_free_limit() {
    let store: Arc<dyn QuotaStore> = Arc::new(MemoryQuotaStore::new());
    store
        .put("u-1", &record("legacy-gold", 0, 50, Utc::now()))
        .await
        .unwrap();
    let service = service_over(store);

    let result = service.check_quota("u-1").await;
    assert_eq!(result.plan, PlanTier::Free);
    assert_eq!(result.limit, 10);
}

#[tokio::test]
async fn premium_counts_as_pro() {
    let store: Arc<dyn QuotaStore> = Arc::new(MemoryQuotaStore::new());
    store
        .put("u-1", &record("premium", 0, 10, Utc::now()))
        .await
        .unwrap();
    let service = service_over(store);

    let result = service.check_quota("u-1").await;
    assert_eq!(result.plan, PlanTier::Pro);
    assert_eq!(result.limit, 100);
}

#[tokio::test]
async fn unlimited_plans_are_effectively_never_denied() {
    let store: Arc<dyn QuotaStore> = Arc::new(MemoryQuotaStore::new());
    store
        .put("u-1", &record("UNLIMITED", 999_999, 1_000_000, Utc::now()))
        .await
        .unwrap();
    let service = service_over(store);

    let result = service.check_quota("u-1").await;
    assert!(result.allowed);
    assert_eq!(result.remaining, 1);
}

#[tokio::test]
async fn store_outage_fails_open_with_sentinel_values() {
    let service = service_over(Arc::new(FailingStore));

    let result = service.check_quota("u-1").await;
    assert!(result.allowed);
    assert_eq!(result.remaining, -1);
    assert_eq!(result.limit, -1);
    assert_eq!(result.plan, PlanTier::Free);
}

#[tokio::test]
async fn mutations_swallow_store_outages() {
    let service = service_over(Arc::new(FailingStore));

    service.increment_usage("u-1").await;
    service
        .update_record(
            "u-1",
            UserQuotaPatch {
                plan: Some("PRO".to_string()),
                ..Default::default()
            },
        )
        .await;
    service.delete_record("u-1").await;

    assert!(service.find_all().await.is_empty());
    assert!(service.get_status("u-1").await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_increments_are_all_counted() {
    let store: Arc<dyn QuotaStore> = Arc::new(MemoryQuotaStore::new());
    let service = service_over(store.clone());

    let mut handles = Vec::new();
    for _ in 0..25 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.increment_usage("u-1").await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stored = store.get("u-1").await.unwrap().unwrap();
    assert_eq!(stored.quota_used, 25);
}

#[tokio::test]
async fn increment_on_a_stale_record_starts_the_new_period_at_one() {
    let store: Arc<dyn QuotaStore> = Arc::new(MemoryQuotaStore::new());
    store
        .put("u-1", &record("PRO", 42, 100, two_months_ago()))
        .await
        .unwrap();
    let service = service_over(store.clone());

    service.increment_usage("u-1").await;

    let stored = store.get("u-1").await.unwrap().unwrap();
    assert_eq!(stored.quota_used, 1);
    assert_eq!(stored.quota_limit, 100);
    assert_eq!(stored.period_start.month(), Utc::now().month());
}

#[tokio::test]
async fn exhausted_users_are_allowed_again_after_rollover() {
    let store: Arc<dyn QuotaStore> = Arc::new(MemoryQuotaStore::new());
    store
        .put("u-1", &record("FREE", 10, 10, two_months_ago()))
        .await
        .unwrap();
    let service = service_over(store);

    let result = service.check_quota("u-1").await;
    assert!(result.allowed);
    assert_eq!(result.remaining, 10);
}

#[tokio::test]
async fn update_record_merges_partial_patches() {
    let store: Arc<dyn QuotaStore> = Arc::new(MemoryQuotaStore::new());
    store
        .put("u-1", &record("FREE", 4, 10, Utc::now()))
        .await
        .unwrap();
    let service = service_over(store.clone());

    service
        .update_record(
            "u-1",
            UserQuotaPatch {
                plan: Some("PRO".to_string()),
                quota_limit: Some(100),
                ..Default::default()
            },
        )
        .await;

    let stored = store.get("u-1").await.unwrap().unwrap();
    assert_eq!(stored.plan, "PRO");
    assert_eq!(stored.quota_limit, 100);
    assert_eq!(stored.quota_used, 4);
}

#[tokio::test]
async fn find_all_returns_every_record_with_its_user_id() {
    let store: Arc<dyn QuotaStore> = Arc::new(MemoryQuotaStore::new());
    store
        .put("alice", &record("FREE", 1, 10, Utc::now()))
        .await
        .unwrap();
    store
        .put("bob", &record("PRO", 2, 100, Utc::now()))
        .await
        .unwrap();
    let service = service_over(store);

    let entries = service.find_all().await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].user_id, "alice");
    assert_eq!(entries[1].user_id, "bob");
    assert_eq!(entries[1].quota.plan, "PRO");
}
