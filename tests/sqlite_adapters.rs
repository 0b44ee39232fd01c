//! Integration tests for the SQLite insight store and queue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use insight_core::models::{HighlightId, Insight};
use insight_core::queue::{MessageQueue, QueueMessage};
use insight_core::store::{InsightNotFound, InsightStore};
use insight_ingest::config::Config;
use insight_ingest::sqlite_queue::SqliteQueue;
use insight_ingest::sqlite_store::SqliteInsightStore;
use insight_ingest::{db, migrate};
use sqlx::SqlitePool;
use tempfile::TempDir;

fn test_config(tmp: &TempDir) -> Config {
    let db_path = tmp.path().join("insight.sqlite");
    let config_content = format!(
        r#"
[db]
path = "{}"

[server]
bind = "127.0.0.1:0"
"#,
        db_path.display()
    );
    toml::from_str(&config_content).unwrap()
}

async fn setup(tmp: &TempDir) -> SqlitePool {
    let config = test_config(tmp);
    migrate::run_migrations(&config).await.unwrap();
    db::connect(&config).await.unwrap()
}

fn insight(tenant: &str, key: &str) -> Insight {
    let ts = Utc.with_ymd_and_hms(2026, 1, 3, 8, 0, 0).unwrap();
    Insight {
        tenant_id: tenant.into(),
        idempotency_key: key.into(),
        highlight_id: HighlightId::Numeric(42),
        source: "readwise".into(),
        event_type: "create".into(),
        received_at: ts,
        text: "The map is not the territory.".into(),
        note: Some("classic".into()),
        url: None,
        tags: vec!["philosophy".into()],
        created_at: ts,
        updated_at: ts,
        enriched: false,
    }
}

fn message(body: &str) -> QueueMessage {
    let mut attributes = BTreeMap::new();
    attributes.insert("tenant_id".to_string(), "tenant-1".to_string());
    QueueMessage {
        body: body.to_string(),
        attributes,
    }
}

// ─── Store ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_store_put_if_absent_and_get() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteInsightStore::new(setup(&tmp).await);

    assert!(store.put_if_absent(&insight("t", "k")).await.unwrap());

    let mut second = insight("t", "k");
    second.text = "overwritten?".into();
    assert!(!store.put_if_absent(&second).await.unwrap());

    let stored = store.get("t", "k").await.unwrap().unwrap();
    assert_eq!(stored, insight("t", "k"));
    assert!(store.get("t", "other").await.unwrap().is_none());
}

#[tokio::test]
async fn test_store_opaque_highlight_id_round_trips() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteInsightStore::new(setup(&tmp).await);

    let mut i = insight("t", "k");
    i.highlight_id = HighlightId::from("hl_abc");
    store.put_if_absent(&i).await.unwrap();
    let stored = store.get("t", "k").await.unwrap().unwrap();
    assert_eq!(stored.highlight_id, HighlightId::from("hl_abc"));
}

#[tokio::test]
async fn test_store_update_never_upserts() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteInsightStore::new(setup(&tmp).await);

    let err = store.update(&insight("t", "k")).await.unwrap_err();
    assert!(err.downcast_ref::<InsightNotFound>().is_some());
    assert!(store.get("t", "k").await.unwrap().is_none());

    store.put_if_absent(&insight("t", "k")).await.unwrap();
    let mut enriched = insight("t", "k");
    enriched.tags.push("summarized".into());
    enriched.enriched = true;
    store.update(&enriched).await.unwrap();

    let stored = store.get("t", "k").await.unwrap().unwrap();
    assert_eq!(stored.tags, vec!["philosophy", "summarized"]);
    assert!(stored.enriched);
}

#[tokio::test]
async fn test_store_concurrent_inserts_create_one_record() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(SqliteInsightStore::new(setup(&tmp).await));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.put_if_absent(&insight("t", "same")).await.unwrap()
        }));
    }
    let mut inserted = 0;
    for h in handles {
        if h.await.unwrap() {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);
}

#[tokio::test]
async fn test_store_lists_unenriched() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteInsightStore::new(setup(&tmp).await);

    store.put_if_absent(&insight("t", "a")).await.unwrap();
    store.put_if_absent(&insight("t", "b")).await.unwrap();
    let mut done = insight("t", "b");
    done.enriched = true;
    store.update(&done).await.unwrap();

    let pending = store.list_unenriched(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].idempotency_key, "a");
}

#[tokio::test]
async fn test_list_unenriched_orders_by_time_within_a_second() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteInsightStore::new(setup(&tmp).await);

    let whole = Utc.with_ymd_and_hms(2026, 1, 3, 8, 0, 0).unwrap();
    let mut later = insight("tenant-1", "later");
    later.created_at = whole + chrono::Duration::milliseconds(500);
    let mut earlier = insight("tenant-1", "earlier");
    earlier.created_at = whole;

    store.put_if_absent(&later).await.unwrap();
    store.put_if_absent(&earlier).await.unwrap();

    let pending = store.list_unenriched(10).await.unwrap();
    let keys: Vec<&str> = pending.iter().map(|i| i.idempotency_key.as_str()).collect();
    assert_eq!(keys, vec!["earlier", "later"]);
    assert_eq!(pending[1].created_at, later.created_at);
}

// ─── Queue ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_queue_send_receive_ack() {
    let tmp = TempDir::new().unwrap();
    let queue = SqliteQueue::new(setup(&tmp).await);

    queue.send(message("one")).await.unwrap();
    queue.send(message("two")).await.unwrap();
    assert_eq!(queue.depth().await.unwrap(), 2);

    let leased = queue.receive(10, Duration::from_secs(30)).await.unwrap();
    assert_eq!(leased.len(), 2);
    assert_eq!(leased[0].receive_count, 1);
    assert_eq!(leased[0].attribute("tenant_id"), Some("tenant-1"));

    // Leased messages are hidden.
    assert!(queue
        .receive(10, Duration::from_secs(30))
        .await
        .unwrap()
        .is_empty());

    for m in &leased {
        queue.ack(&m.message_id).await.unwrap();
    }
    assert_eq!(queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_queue_respects_batch_size() {
    let tmp = TempDir::new().unwrap();
    let queue = SqliteQueue::new(setup(&tmp).await);
    for i in 0..5 {
        queue.send(message(&format!("m{}", i))).await.unwrap();
    }
    let leased = queue.receive(2, Duration::from_secs(30)).await.unwrap();
    assert_eq!(leased.len(), 2);
    let rest = queue.receive(10, Duration::from_secs(30)).await.unwrap();
    assert_eq!(rest.len(), 3);
}

#[tokio::test]
async fn test_queue_release_redelivers_with_count() {
    let tmp = TempDir::new().unwrap();
    let queue = SqliteQueue::new(setup(&tmp).await);
    queue.send(message("retry-me")).await.unwrap();

    let first = queue.receive(1, Duration::from_secs(30)).await.unwrap();
    queue.release(&first[0].message_id).await.unwrap();

    let second = queue.receive(1, Duration::from_secs(30)).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].message_id, first[0].message_id);
    assert_eq!(second[0].receive_count, 2);
    assert_eq!(second[0].body, "retry-me");
}

#[tokio::test]
async fn test_queue_extend_lease_hides_message() {
    let tmp = TempDir::new().unwrap();
    let queue = SqliteQueue::new(setup(&tmp).await);
    queue.send(message("long")).await.unwrap();

    // A zero-length lease is visible again straight away.
    let first = queue.receive(1, Duration::ZERO).await.unwrap();
    queue
        .extend_lease(&first[0].message_id, Duration::from_secs(30))
        .await
        .unwrap();

    assert!(queue
        .receive(1, Duration::from_secs(30))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(queue.depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_queue_expired_lease_redelivers() {
    let tmp = TempDir::new().unwrap();
    let queue = SqliteQueue::new(setup(&tmp).await);
    queue.send(message("slow")).await.unwrap();

    let first = queue.receive(1, Duration::from_millis(50)).await.unwrap();
    assert_eq!(first.len(), 1);
    tokio::time::sleep(Duration::from_millis(120)).await;

    let again = queue.receive(1, Duration::from_secs(30)).await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].receive_count, 2);
}
