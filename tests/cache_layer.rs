use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use validator::Validate;

use entity_cache::domain::entity::{
    EntityId, FixedTenant, ListFilters, NewRecord, Record, TaskLocalTenant, TenantContext,
    TenantId,
};
use entity_cache::infrastructure::cache::{CacheConfig, InMemoryCacheConfig, InMemoryCacheStore};
use entity_cache::infrastructure::entity::InMemoryEntityStore;
use entity_cache::{
    create_cache_service, create_repository, AppConfig, CacheService, DomainError, EntityHooks,
    EntityRepository,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
struct User {
    #[validate(length(min = 1, max = 64))]
    name: String,
    #[validate(email)]
    email: String,
}

fn user(name: &str) -> User {
    User {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
    }
}

#[derive(Debug, Default)]
struct UserRepository;

#[async_trait]
impl EntityHooks for UserRepository {
    type Attributes = User;

    const ENTITY_NAME: &'static str = "user";

    fn keyword_fields(&self) -> &'static [&'static str] {
        &["name", "email"]
    }
}

fn at(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
}

async fn cache() -> Arc<CacheService> {
    create_cache_service(&CacheConfig::in_memory().with_key_prefix("app:"))
        .await
        .unwrap()
}

async fn users(tenants: Arc<dyn TenantContext>) -> EntityRepository<UserRepository> {
    create_repository(&AppConfig::default(), UserRepository, "users", cache().await, tenants)
        .await
        .unwrap()
}

fn seeded_users(records: Vec<Record<User>>, cache: Arc<CacheService>) -> EntityRepository<UserRepository> {
    EntityRepository::new(
        UserRepository,
        Arc::new(InMemoryEntityStore::with_records(records)),
        cache,
        Arc::new(FixedTenant(TenantId::new(1))),
    )
}

#[tokio::test]
async fn build_key_is_deterministic_and_order_sensitive() {
    let cache = cache().await;

    let a = cache.build_key("report", ["2024", "q1"]);
    let b = cache.build_key("report", ["2024", "q1"]);
    let c = cache.build_key("report", ["q1", "2024"]);

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a, "report:2024:q1");
}

#[tokio::test]
async fn remember_runs_loader_once() {
    let cache = cache().await;
    let calls = AtomicUsize::new(0);
    let calls = &calls;

    for _ in 0..2 {
        let value: Option<String> = cache
            .remember("greeting", Some(Duration::from_secs(60)), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Some("hello".to_string())
            })
            .await;

        assert_eq!(value.as_deref(), Some("hello"));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn wipe_removes_every_key_under_tag() {
    let cache = cache().await;
    for id in 1..=3 {
        cache.write("user", &format!("find_{}", id), &id, None).await;
    }
    cache.write("team", "find_1", &1, None).await;

    assert_eq!(cache.wipe("user").await, 3);

    for id in 1..=3 {
        assert!(cache.load::<i32>("user", &format!("find_{}", id)).await.is_none());
    }
    assert_eq!(cache.load::<i32>("team", "find_1").await, Some(1));
}

#[tokio::test]
async fn concurrent_locks_have_one_winner() {
    let cache = cache().await;

    let attempts: Vec<_> = (0..2)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.lock("nightly-report", Duration::from_secs(10)).await })
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        if attempt.await.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
}

#[tokio::test]
async fn locked_fails_fast_while_held() {
    let cache = cache().await;
    assert!(cache.lock("import", Duration::from_secs(10)).await);

    let result: Result<(), DomainError> = cache
        .locked("import", Duration::from_secs(10), || async { Ok(()) })
        .await;

    assert!(matches!(result, Err(DomainError::LockAcquisition { .. })));
}

#[tokio::test]
async fn increment_then_decrement_restores_value() {
    let cache = cache().await;
    cache.put("visits", &10, None).await;

    assert_eq!(cache.increment("visits", 5).await, 15);
    assert_eq!(cache.decrement("visits", 5).await, 10);
    assert_eq!(cache.get::<i64>("visits").await, Some(10));
}

#[tokio::test]
async fn find_by_id_caches_under_tag_and_find_key() {
    let cache = cache().await;
    let record = NewRecord::new(TenantId::new(1), user("Ada"))
        .into_record(EntityId::new(42), at("2024-01-15T10:00:00Z"));
    let repo = seeded_users(vec![record], cache.clone());

    assert_eq!(repo.tag(), "user");

    let found = repo.find_by_id(EntityId::new(42)).await.unwrap().unwrap();
    assert_eq!(found.attributes.name, "Ada");

    let cached: Option<Record<User>> = cache.load("user", "find_42").await;
    assert_eq!(cached.map(|r| r.id), Some(EntityId::new(42)));
    assert!(cache.store().exists("app:user:find_42").await.unwrap());
}

#[tokio::test]
async fn create_then_find_uses_context_tenant() {
    let repo = users(Arc::new(FixedTenant(TenantId::new(5)))).await;

    let created = repo.create(user("Grace")).await.unwrap();
    let found = repo.find_by_id(created.id).await.unwrap().unwrap();

    assert_eq!(found.attributes, user("Grace"));
    assert_eq!(found.tenant_id, TenantId::new(5));
}

#[tokio::test]
async fn update_changes_only_the_named_field() {
    let repo = users(Arc::new(FixedTenant(TenantId::new(1)))).await;
    let created = repo.create(user("Linus")).await.unwrap();
    repo.find_by_id(created.id).await.unwrap();

    let mut changes = Map::new();
    changes.insert("name".to_string(), json!("Linus T"));
    repo.update(created.id, changes).await.unwrap();

    let found = repo.find_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(found.attributes.name, "Linus T");
    assert_eq!(found.attributes.email, "linus@example.com");
}

#[tokio::test]
async fn delete_then_find_or_fail_is_not_found() {
    let repo = users(Arc::new(FixedTenant(TenantId::new(1)))).await;
    let created = repo.create(user("Ken")).await.unwrap();
    repo.find_by_id(created.id).await.unwrap();

    repo.delete(created.id).await.unwrap();

    let error = repo.find_or_fail(created.id).await.unwrap_err();
    assert!(matches!(error, DomainError::NotFound { .. }));
}

#[tokio::test]
async fn time_range_filter_keeps_rows_inside_window() {
    let rows = [
        (1, "Dennis", "2023-12-31T09:00:00Z"),
        (2, "Barbara", "2024-01-15T09:00:00Z"),
        (3, "Edsger", "2024-02-01T09:00:00Z"),
    ];
    let records = rows
        .into_iter()
        .map(|(id, name, created_at)| {
            NewRecord::new(TenantId::new(1), user(name)).into_record(EntityId::new(id), at(created_at))
        })
        .collect();
    let repo = seeded_users(records, cache().await);

    let filters = ListFilters::from_value(json!({
        "created_at": ["2024-01-01", "2024-01-31"]
    }))
    .unwrap();

    let found = repo.get_list(&filters).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].attributes.name, "Barbara");
    assert_eq!(repo.get_count(&filters).await.unwrap(), 1);
}

#[tokio::test]
async fn tenants_only_see_their_own_records() {
    let repo = Arc::new(users(Arc::new(TaskLocalTenant)).await);

    for (tenant, name) in [(1, "Alan"), (1, "Alonzo"), (2, "Kurt")] {
        let repo = repo.clone();
        TaskLocalTenant::scope(TenantId::new(tenant), async move {
            repo.create(user(name)).await.unwrap();
        })
        .await;
    }

    let first = repo.clone();
    let count = TaskLocalTenant::scope(TenantId::new(1), async move {
        first.get_count(&ListFilters::new()).await.unwrap()
    })
    .await;
    assert_eq!(count, 2);

    let second = repo.clone();
    let names: Vec<Value> = TaskLocalTenant::scope(TenantId::new(2), async move {
        second
            .get_list(&ListFilters::new().with_keyword("ku"))
            .await
            .unwrap()
            .into_iter()
            .map(|r| json!(r.attributes.name))
            .collect()
    })
    .await;
    assert_eq!(names, vec![json!("Kurt")]);
}

#[tokio::test]
async fn lock_is_held_while_store_evicts_values() {
    let store = InMemoryCacheStore::with_config(InMemoryCacheConfig::default().with_max_capacity(200));
    let cache = CacheService::new(Arc::new(store));

    assert!(cache.lock("nightly-export", Duration::from_secs(60)).await);

    for i in 0..200 {
        let key = format!("page:{}", i);
        cache.put(&key, "x".repeat(20).as_str(), None).await;
        let _: Option<String> = cache.get(&key).await;
    }

    assert!(!cache.lock("nightly-export", Duration::from_secs(60)).await);
}

#[tokio::test]
async fn cancelled_locked_call_releases_lock() {
    let cache = cache().await;

    let result = tokio::time::timeout(
        Duration::from_millis(50),
        cache.locked("nightly-export", Duration::from_secs(60), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, DomainError>(())
        }),
    )
    .await;
    assert!(result.is_err());

    tokio::time::sleep(Duration::from_millis(20)).await;

    let rerun = cache
        .locked("nightly-export", Duration::from_secs(60), || async {
            Ok::<_, DomainError>("done")
        })
        .await;
    assert_eq!(rerun.unwrap(), "done");
}

#[tokio::test]
async fn wiping_lock_tag_keeps_lock_held() {
    let cache = cache().await;

    assert!(cache.lock("nightly-export", Duration::from_secs(60)).await);

    assert_eq!(cache.wipe("lock").await, 0);
    assert!(!cache.drop_tagged("lock", "nightly-export").await);

    assert!(!cache.lock("nightly-export", Duration::from_secs(60)).await);
}
