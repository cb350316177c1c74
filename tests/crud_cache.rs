//! End-to-end behaviour of `CrudManager` over the in-process store.
//!
//! Store call counters are the observable for cache hits: a read served from
//! cache leaves them untouched.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use rowcache::application::crud::{CrudManager, FindOptions, Related, WriteContext};
use rowcache::application::error::{CrudError, PreconditionError};
use rowcache::application::pagination::PageRequest;
use rowcache::application::repos::RepoError;
use rowcache::cache::{CacheConfig, CacheCoordinator, CacheStats, CachedRecord, RecordCache};
use rowcache::domain::model::{AuditColumns, ModelDef, ModelRegistry, RelationDef};
use rowcache::domain::query::{Filter, OrderBy, Projection};
use rowcache::domain::record::{RecordId, Row};
use rowcache::infra::memory::{MemoryStore, StoreOp};

const TTL: Duration = Duration::from_secs(60);

fn row(value: Value) -> Row {
    value.as_object().cloned().expect("object literal")
}

fn admin() -> WriteContext {
    WriteContext::actor("admin")
}

fn registry() -> ModelRegistry {
    ModelRegistry::new([
        ModelDef::new("users")
            .with_cache_ttl(TTL)
            .with_relation(
                RelationDef::to_many("posts", "posts", "id", "author_id")
                    .ordered_by(vec![OrderBy::asc("id")]),
            )
            .with_relation(RelationDef::to_one("team", "teams", "team_id", "id")),
        ModelDef::new("posts")
            .with_cache_ttl(TTL)
            .with_audit(AuditColumns::none())
            .with_relation(RelationDef::to_one("author", "users", "author_id", "id")),
        ModelDef::new("teams")
            .with_cache_ttl(TTL)
            .with_audit(AuditColumns::none())
            .with_soft_delete(None),
        ModelDef::new("events")
            .with_cache_ttl(TTL)
            .with_audit(AuditColumns::none())
            .with_soft_delete(None),
        ModelDef::new("audit_logs")
            .with_audit(AuditColumns::none())
            .with_soft_delete(None),
    ])
    .expect("valid registry")
}

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed(
        "users",
        [
            row(json!({"id": 1, "name": "ada", "email": "ada@example.com", "role": "admin", "team_id": 1, "deleted_at": null})),
            row(json!({"id": 2, "name": "grace", "email": "grace@example.com", "role": "editor", "team_id": 1, "deleted_at": null})),
            row(json!({"id": 3, "name": "linus", "email": "linus@example.com", "role": "editor", "team_id": 2, "deleted_at": null})),
        ],
    );
    store.seed(
        "posts",
        [
            row(json!({"id": 1, "title": "first", "author_id": 1, "deleted_at": null})),
            row(json!({"id": 2, "title": "second", "author_id": 1, "deleted_at": null})),
            row(json!({"id": 3, "title": "third", "author_id": 2, "deleted_at": null})),
        ],
    );
    store.seed(
        "teams",
        [
            row(json!({"id": 1, "name": "core"})),
            row(json!({"id": 2, "name": "kernel"})),
        ],
    );
    store.seed(
        "events",
        (1..=23).map(|id| {
            let kind = if id % 2 == 1 { "odd" } else { "even" };
            row(json!({"id": id, "kind": kind}))
        }),
    );
    store.seed("audit_logs", [row(json!({"id": 1, "message": "boot"}))]);
    store
}

struct Harness {
    store: Arc<MemoryStore>,
    coordinator: Arc<CacheCoordinator>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    fn with_config(config: CacheConfig) -> Self {
        Self {
            store: seeded_store(),
            coordinator: Arc::new(CacheCoordinator::new(Arc::new(registry()), config)),
        }
    }

    fn manager(&self, model: &str) -> CrudManager {
        CrudManager::new(model, self.store.clone(), self.coordinator.clone())
            .expect("registered model")
    }

    fn find_first_calls(&self) -> u64 {
        self.store.calls().find_first
    }

    fn reads(&self) -> u64 {
        self.store.calls().reads()
    }
}

fn columns(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn cached_records_expire_after_their_ttl() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let options = FindOptions::default();

    users.find_one(RecordId::from(1), &options).await.expect("read");
    users.find_one(RecordId::from(1), &options).await.expect("read");
    assert_eq!(harness.find_first_calls(), 1);

    tokio::time::advance(Duration::from_secs(59)).await;
    users.find_one(RecordId::from(1), &options).await.expect("read");
    assert_eq!(harness.find_first_calls(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let row = users
        .find_one(RecordId::from(1), &options)
        .await
        .expect("read")
        .expect("user exists");
    assert_eq!(row["name"], json!("ada"));
    assert_eq!(harness.find_first_calls(), 2);
}

#[test]
fn partial_puts_merge_instead_of_overwriting() {
    let cache = RecordCache::new(None);
    let id = RecordId::from(1);

    cache.put(
        "users",
        &id,
        CachedRecord::partial(row(json!({"id": 1, "name": "a"}))),
        TTL,
    );
    cache.put(
        "users",
        &id,
        CachedRecord::partial(row(json!({"id": 1, "email": "b"}))),
        TTL,
    );

    let merged = cache
        .get("users", &id, &Projection::columns(["name", "email"]))
        .expect("both fields cached");
    assert_eq!(merged, row(json!({"name": "a", "email": "b"})));
}

#[tokio::test(start_paused = true)]
async fn widening_a_projection_misses_once_then_hits() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let id = RecordId::from(1);

    let narrow = FindOptions::default().select(["name", "email"]);
    users.find_one(id.clone(), &narrow).await.expect("read");
    assert_eq!(harness.find_first_calls(), 1);

    let wide = FindOptions::default().select(["name", "email", "role"]);
    let row = users
        .find_one(id.clone(), &wide)
        .await
        .expect("read")
        .expect("user exists");
    assert_eq!(row["role"], json!("admin"));
    assert_eq!(harness.find_first_calls(), 2);

    let cached = harness
        .coordinator
        .records()
        .peek("users", &id)
        .expect("record cached");
    assert_eq!(cached.fields(), &columns(&["email", "id", "name", "role"]));

    tokio::time::advance(Duration::from_secs(30)).await;
    let again = users
        .find_one(id, &wide)
        .await
        .expect("read")
        .expect("user exists");
    assert_eq!(again, row);
    assert_eq!(harness.find_first_calls(), 2);
}

#[tokio::test]
async fn updates_are_visible_to_every_read_path() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let id = RecordId::from(1);
    let page = PageRequest::new(1, 10).expect("valid page");
    let options = FindOptions::default();

    users.find_one(id.clone(), &options).await.expect("read");
    users
        .find_list(Filter::All, page, &options)
        .await
        .expect("list");
    users
        .find_many(Filter::eq("role", "admin"), &options)
        .await
        .expect("many");

    let updated = users
        .update(&admin(), &id, row(json!({"name": "x"})))
        .await
        .expect("update");
    assert_eq!(updated["name"], json!("x"));

    let one = users
        .find_one(id.clone(), &options)
        .await
        .expect("read")
        .expect("user exists");
    assert_eq!(one["name"], json!("x"));

    let list = users
        .find_list(Filter::All, page, &options)
        .await
        .expect("list");
    assert_eq!(list.data[0]["name"], json!("x"));

    let admins = users
        .find_many(Filter::eq("role", "admin"), &options)
        .await
        .expect("many");
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0]["name"], json!("x"));
}

#[tokio::test]
async fn writes_populate_the_record_cache() {
    let harness = Harness::new();
    let users = harness.manager("users");

    let created = users
        .create(&admin(), row(json!({"name": "margaret", "role": "editor"})))
        .await
        .expect("create");
    let id = RecordId::from_row(&created, "id").expect("assigned id");

    let found = users
        .find_one(id, &FindOptions::default())
        .await
        .expect("read")
        .expect("created user");
    assert_eq!(found, created);
    assert_eq!(harness.find_first_calls(), 0);
}

#[tokio::test]
async fn soft_deleted_rows_disappear_from_reads_but_stay_stored() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let id = RecordId::from(2);
    let page = PageRequest::new(1, 10).expect("valid page");
    let options = FindOptions::default();

    users.find_one(id.clone(), &options).await.expect("read");
    let before = users
        .find_list(Filter::All, page, &options)
        .await
        .expect("list");
    assert_eq!(before.total, 3);

    users.soft_delete(&admin(), &id).await.expect("soft delete");

    assert!(
        users
            .find_one(id.clone(), &options)
            .await
            .expect("read")
            .is_none()
    );
    assert!(
        users
            .find_one(id.clone(), &options.clone().bypass_cache())
            .await
            .expect("read")
            .is_none()
    );

    let after = users
        .find_list(Filter::All, page, &options)
        .await
        .expect("list");
    assert_eq!(after.total, 2);
    assert!(after.data.iter().all(|row| row["id"] != json!(2)));
    assert_eq!(
        users.count(Filter::All, &options).await.expect("count"),
        2
    );

    let stored = harness.store.row("users", &id).expect("row still stored");
    assert!(stored["deleted_at"].is_string());
    assert_eq!(stored["updated_by"], json!("admin"));
    assert!(harness.coordinator.records().peek("users", &id).is_none());
}

#[tokio::test]
async fn pages_add_up_to_the_filtered_total() {
    let harness = Harness::new();
    let events = harness.manager("events");
    let options = FindOptions::default();

    for (filter, expected_total) in [(Filter::All, 23_u64), (Filter::eq("kind", "odd"), 12)] {
        for per_page in [1_u32, 5, 7, 23, 50] {
            let mut seen = Vec::new();
            let mut total_pages = None;
            let mut page_number = 1;
            loop {
                let page = PageRequest::new(page_number, per_page).expect("valid page");
                let result = events
                    .find_list(filter.clone(), page, &options)
                    .await
                    .expect("list");
                assert_eq!(result.total, expected_total);
                assert_eq!(
                    result.total_pages,
                    expected_total.div_ceil(u64::from(per_page))
                );
                total_pages = Some(result.total_pages);
                if result.data.is_empty() {
                    break;
                }
                seen.extend(result.data.into_iter().map(|row| row["id"].clone()));
                page_number += 1;
            }

            assert_eq!(seen.len() as u64, expected_total);
            assert_eq!(Some(u64::from(page_number - 1)), total_pages);
            let distinct: BTreeSet<String> = seen.iter().map(Value::to_string).collect();
            assert_eq!(distinct.len(), seen.len());
        }
    }
}

#[tokio::test]
async fn cached_pages_match_store_pages() {
    let harness = Harness::new();
    let events = harness.manager("events");
    let page = PageRequest::new(2, 5).expect("valid page");
    let options = FindOptions::default().order_by([OrderBy::desc("id")]);

    let first = events
        .find_list(Filter::All, page, &options)
        .await
        .expect("list");
    let reads = harness.reads();
    let second = events
        .find_list(Filter::All, page, &options)
        .await
        .expect("list");

    assert_eq!(first, second);
    assert_eq!(harness.reads(), reads);
    let ids: Vec<Value> = second.data.iter().map(|row| row["id"].clone()).collect();
    assert_eq!(ids, vec![json!(18), json!(17), json!(16), json!(15), json!(14)]);
}

#[tokio::test]
async fn projected_reads_have_one_shape_from_store_and_cache() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let options = FindOptions::default().select(["name", "nickname"]);

    let first = users
        .find_one(RecordId::from(1), &options)
        .await
        .expect("read")
        .expect("user exists");
    let second = users
        .find_one(RecordId::from(1), &options)
        .await
        .expect("read")
        .expect("user exists");

    assert_eq!(harness.find_first_calls(), 1);
    assert_eq!(first, second);
    assert_eq!(first, row(json!({"id": 1, "name": "ada", "nickname": null})));

    let page = PageRequest::new(1, 10).expect("valid page");
    let listed = users
        .find_list(Filter::All, page, &options)
        .await
        .expect("list");
    let reads = harness.reads();
    let relisted = users
        .find_list(Filter::All, page, &options)
        .await
        .expect("list");
    assert_eq!(harness.reads(), reads);
    assert_eq!(listed, relisted);
}

#[tokio::test]
async fn query_hits_with_an_evicted_record_become_full_misses() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let page = PageRequest::new(1, 10).expect("valid page");
    let options = FindOptions::default();

    let first = users
        .find_list(Filter::All, page, &options)
        .await
        .expect("list");
    assert_eq!(first.data.len(), 3);
    assert_eq!(harness.coordinator.stats().queries, 1);

    let records = harness.coordinator.records();
    assert!(records.invalidate("users", &RecordId::from(2)));

    // Fail the fallback so the cache is observed right after the miss.
    harness.store.fail_next(StoreOp::Count, RepoError::Timeout);
    users
        .find_list(Filter::All, page, &options)
        .await
        .expect_err("fallback read fails");
    assert_eq!(harness.coordinator.stats().queries, 0);
    assert!(records.peek("users", &RecordId::from(1)).is_some());
    assert!(records.peek("users", &RecordId::from(3)).is_some());

    let reads = harness.reads();
    let second = users
        .find_list(Filter::All, page, &options)
        .await
        .expect("list");
    assert_eq!(harness.reads(), reads + 2);
    assert_eq!(second, first);

    let reads = harness.reads();
    users
        .find_list(Filter::All, page, &options)
        .await
        .expect("list");
    assert_eq!(harness.reads(), reads);
}

#[tokio::test]
async fn relation_links_with_an_evicted_record_reload_from_the_store() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let owner = RecordId::from(1);
    let options = FindOptions::default();

    let first = users
        .get_relation(&owner, "posts", &options)
        .await
        .expect("relation")
        .expect("owner exists");
    assert!(
        harness
            .coordinator
            .records()
            .invalidate("posts", &RecordId::from(2))
    );

    let reads = harness.reads();
    let second = users
        .get_relation(&owner, "posts", &options)
        .await
        .expect("relation")
        .expect("owner exists");
    assert_eq!(harness.reads(), reads + 1);
    let Related::Many(rows) = &second else {
        panic!("posts is a to-many relation");
    };
    assert_eq!(rows.len(), 2);
    assert_eq!(second, first);

    let reads = harness.reads();
    users
        .get_relation(&owner, "posts", &options)
        .await
        .expect("relation");
    assert_eq!(harness.reads(), reads);
}

#[tokio::test]
async fn failed_writes_leave_the_cache_untouched() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let id = RecordId::from(1);
    let page = PageRequest::new(1, 10).expect("valid page");
    let options = FindOptions::default();

    users.find_one(id.clone(), &options).await.expect("read");
    users
        .find_list(Filter::All, page, &options)
        .await
        .expect("list");
    let record_before = harness.coordinator.records().peek("users", &id);
    let stats_before = harness.coordinator.stats();

    let violation = RepoError::Duplicate {
        constraint: "users_email_key".to_string(),
    };
    harness
        .store
        .fail_next(StoreOp::UpdateByKey, violation.clone());
    let err = users
        .update(&admin(), &id, row(json!({"email": "grace@example.com"})))
        .await
        .expect_err("constraint violation");

    assert_eq!(err, CrudError::Store(violation));
    assert_eq!(harness.coordinator.records().peek("users", &id), record_before);
    assert_eq!(harness.coordinator.stats(), stats_before);

    harness.store.fail_next(StoreOp::Insert, RepoError::Timeout);
    let err = users
        .create(&admin(), row(json!({"name": "nobody"})))
        .await
        .expect_err("timeout");
    assert_eq!(err.store_error(), Some(&RepoError::Timeout));
    assert_eq!(harness.coordinator.stats(), stats_before);
}

#[tokio::test]
async fn store_read_failures_propagate_and_cache_nothing() {
    let harness = Harness::new();
    let users = harness.manager("users");

    harness.store.fail_next(StoreOp::FindFirst, RepoError::Timeout);
    let err = users
        .find_one(RecordId::from(1), &FindOptions::default())
        .await
        .expect_err("timeout");
    assert_eq!(err, CrudError::Store(RepoError::Timeout));
    assert_eq!(harness.coordinator.stats(), CacheStats::default());

    let row = users
        .find_one(RecordId::from(1), &FindOptions::default())
        .await
        .expect("retry succeeds");
    assert!(row.is_some());
}

#[tokio::test]
async fn to_many_relations_are_cached_and_cascade_on_target_writes() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let posts = harness.manager("posts");
    let owner = RecordId::from(1);
    let options = FindOptions::default();

    let related = users
        .get_relation(&owner, "posts", &options)
        .await
        .expect("relation")
        .expect("owner exists");
    let Related::Many(rows) = related else {
        panic!("posts is a to-many relation");
    };
    assert_eq!(rows.len(), 2);

    let reads = harness.reads();
    users
        .get_relation(&owner, "posts", &options)
        .await
        .expect("relation");
    assert_eq!(harness.reads(), reads);

    posts
        .create(&admin(), row(json!({"title": "fourth", "author_id": 1})))
        .await
        .expect("create post");

    let Some(Related::Many(rows)) = users
        .get_relation(&owner, "posts", &options)
        .await
        .expect("relation")
    else {
        panic!("posts is a to-many relation");
    };
    let titles: Vec<&str> = rows.iter().filter_map(|row| row["title"].as_str()).collect();
    assert_eq!(titles, vec!["first", "second", "fourth"]);
}

#[tokio::test]
async fn empty_relations_are_cached_as_known_empty() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let owner = RecordId::from(3);
    let options = FindOptions::default();

    let first = users
        .get_relation(&owner, "posts", &options)
        .await
        .expect("relation");
    assert_eq!(first, Some(Related::Many(Vec::new())));

    let reads = harness.reads();
    let second = users
        .get_relation(&owner, "posts", &options)
        .await
        .expect("relation");
    assert_eq!(second, first);
    assert_eq!(harness.reads(), reads);
}

#[tokio::test]
async fn to_one_relations_reflect_updates_of_the_target() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let posts = harness.manager("posts");
    let post = RecordId::from(3);
    let options = FindOptions::default();

    let Some(Related::One(Some(author))) = posts
        .get_relation(&post, "author", &options)
        .await
        .expect("relation")
    else {
        panic!("post 3 has an author");
    };
    assert_eq!(author["name"], json!("grace"));

    users
        .update(&admin(), &RecordId::from(2), row(json!({"name": "hopper"})))
        .await
        .expect("update");

    let Some(Related::One(Some(author))) = posts
        .get_relation(&post, "author", &options)
        .await
        .expect("relation")
    else {
        panic!("post 3 has an author");
    };
    assert_eq!(author["name"], json!("hopper"));

    users
        .soft_delete(&admin(), &RecordId::from(2))
        .await
        .expect("soft delete");
    let related = posts
        .get_relation(&post, "author", &options)
        .await
        .expect("relation");
    assert_eq!(related, Some(Related::One(None)));
}

#[tokio::test]
async fn relations_of_missing_owners_are_absent() {
    let harness = Harness::new();
    let users = harness.manager("users");

    let related = users
        .get_relation(&RecordId::from(99), "posts", &FindOptions::default())
        .await
        .expect("relation");
    assert_eq!(related, None);
}

#[tokio::test]
async fn include_attaches_relations_without_caching_them_inline() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let id = RecordId::from(1);

    let row = users
        .find_one(
            id.clone(),
            &FindOptions::default().include("posts").include("team"),
        )
        .await
        .expect("read")
        .expect("user exists");

    assert_eq!(row["posts"].as_array().map(Vec::len), Some(2));
    assert_eq!(row["team"]["name"], json!("core"));

    let cached = harness
        .coordinator
        .records()
        .peek("users", &id)
        .expect("record cached");
    assert!(!cached.fields().contains("posts"));
    assert!(!cached.fields().contains("team"));
}

#[tokio::test]
async fn bypassing_the_cache_touches_no_tier() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let options = FindOptions::default().bypass_cache();
    let page = PageRequest::new(1, 2).expect("valid page");

    users.find_one(RecordId::from(1), &options).await.expect("read");
    users.find_one(RecordId::from(1), &options).await.expect("read");
    users
        .find_list(Filter::All, page, &options)
        .await
        .expect("list");
    users
        .get_relation(&RecordId::from(1), "posts", &options)
        .await
        .expect("relation");

    assert_eq!(harness.find_first_calls(), 3);
    assert_eq!(harness.coordinator.stats(), CacheStats::default());

    users
        .find_one(RecordId::from(1), &FindOptions::default())
        .await
        .expect("read");
    assert_eq!(harness.coordinator.stats().records, 1);
}

#[tokio::test]
async fn uncached_models_and_disabled_caches_pass_through() {
    let harness = Harness::new();
    let logs = harness.manager("audit_logs");
    logs.find_one(RecordId::from(1), &FindOptions::default())
        .await
        .expect("read");
    logs.find_one(RecordId::from(1), &FindOptions::default())
        .await
        .expect("read");
    assert_eq!(harness.find_first_calls(), 2);
    assert_eq!(harness.coordinator.stats(), CacheStats::default());

    let disabled = Harness::with_config(CacheConfig::disabled());
    let users = disabled.manager("users");
    users
        .find_one(RecordId::from(1), &FindOptions::default())
        .await
        .expect("read");
    users
        .update(&admin(), &RecordId::from(1), row(json!({"name": "x"})))
        .await
        .expect("update");
    let row = users
        .find_one(RecordId::from(1), &FindOptions::default())
        .await
        .expect("read")
        .expect("user exists");
    assert_eq!(row["name"], json!("x"));
    assert_eq!(disabled.find_first_calls(), 2);
    assert_eq!(disabled.coordinator.stats(), CacheStats::default());
}

#[tokio::test]
async fn filter_lookups_and_counts_are_cached_until_a_write() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let options = FindOptions::default();
    let editors = Filter::eq("role", "editor");

    let found = users
        .find_one(Filter::eq("name", "grace"), &options)
        .await
        .expect("read")
        .expect("grace exists");
    assert_eq!(found["id"], json!(2));
    users
        .find_one(Filter::eq("name", "grace"), &options)
        .await
        .expect("read");
    assert_eq!(harness.store.calls().find_many, 1);

    assert_eq!(users.count(editors.clone(), &options).await.expect("count"), 2);
    assert_eq!(users.count(editors.clone(), &options).await.expect("count"), 2);
    assert_eq!(harness.store.calls().count, 1);

    users
        .create(&admin(), row(json!({"name": "barbara", "role": "editor"})))
        .await
        .expect("create");
    assert_eq!(users.count(editors, &options).await.expect("count"), 3);
    assert_eq!(harness.store.calls().count, 2);
}

#[tokio::test]
async fn mutations_without_an_actor_never_reach_the_store() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let anonymous = WriteContext::anonymous();

    let results = [
        users
            .create(&anonymous, row(json!({"name": "eve"})))
            .await
            .expect_err("create"),
        users
            .update(&anonymous, &RecordId::from(1), row(json!({"name": "eve"})))
            .await
            .expect_err("update"),
        users
            .soft_delete(&anonymous, &RecordId::from(1))
            .await
            .expect_err("soft delete"),
    ];

    for err in results {
        assert_eq!(
            err,
            CrudError::Precondition(PreconditionError::MissingActor {
                model: "users".to_string(),
            })
        );
    }
    assert_eq!(harness.store.calls().total(), 0);
}

#[tokio::test]
async fn operator_invalidation_drops_dependent_models() {
    let harness = Harness::new();
    let users = harness.manager("users");
    let posts = harness.manager("posts");
    let options = FindOptions::default();

    users.find_one(RecordId::from(1), &options).await.expect("read");
    posts.find_one(RecordId::from(1), &options).await.expect("read");
    users
        .get_relation(&RecordId::from(1), "posts", &options)
        .await
        .expect("relation");

    let plan = harness
        .coordinator
        .invalidate_model("posts")
        .expect("known model");
    assert!(plan.query_models.contains("users"));
    assert!(harness.coordinator.records().peek("posts", &RecordId::from(1)).is_none());
    assert!(
        harness
            .coordinator
            .relations()
            .get_link("users", &RecordId::from(1), "posts")
            .is_none()
    );

    harness.coordinator.clear();
    assert_eq!(harness.coordinator.stats(), CacheStats::default());
}
