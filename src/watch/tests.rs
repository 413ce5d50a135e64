use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use super::*;
use crate::store::{DocumentStore, MemoryStore, Query};

fn collection_query() -> QueryFactory {
    Arc::new(|key: &str| Query::collection(key))
}

fn count_watch(store: &MemoryStore, keys: &[&str]) -> CellWatch<Value, usize> {
    CellWatch::start(
        Arc::new(store.clone()),
        keys.iter().map(|key| key.to_string()).collect(),
        collection_query(),
        0,
        |snapshots: &ShardSnapshots<Value>| snapshots.items().count(),
    )
}

async fn wait_count(watch: &mut CellWatch<Value, usize>, expected: usize) -> usize {
    tokio::time::timeout(Duration::from_secs(2), watch.wait_for(|n| *n == expected))
        .await
        .expect("aggregate did not converge")
        .expect("watch closed")
}

#[tokio::test]
async fn test_aggregate_spans_all_shards() {
    let store = MemoryStore::new();
    store.set("a/x/items/1", json!({"v": 1})).await.unwrap();
    store.set("b/x/items/2", json!({"v": 2})).await.unwrap();

    let mut watch = count_watch(&store, &["a/x/items", "b/x/items"]);
    assert_eq!(wait_count(&mut watch, 2).await, 2);

    // 任一分片变化都从全部分片重新计算
    store.set("b/x/items/3", json!({"v": 3})).await.unwrap();
    assert_eq!(wait_count(&mut watch, 3).await, 3);
    store.delete("a/x/items/1").await.unwrap();
    assert_eq!(wait_count(&mut watch, 2).await, 2);
}

#[tokio::test]
async fn test_duplicate_keys_are_watched_once() {
    let store = MemoryStore::new();
    store.set("a/x/items/1", json!({"v": 1})).await.unwrap();

    let mut watch = count_watch(&store, &["a/x/items", "a/x/items"]);
    assert_eq!(watch.shard_keys(), vec!["a/x/items".to_string()]);
    assert_eq!(wait_count(&mut watch, 1).await, 1);
}

#[tokio::test]
async fn test_retarget_same_set_is_noop() {
    let store = MemoryStore::new();
    let watch = count_watch(&store, &["a/x/items", "b/x/items"]);
    assert!(!watch.retarget(vec!["b/x/items".into(), "a/x/items".into()]));
    assert!(watch.retarget(vec!["a/x/items".into()]));
}

#[tokio::test]
async fn test_retarget_drops_removed_shard_state() {
    let store = MemoryStore::new();
    store.set("a/x/items/1", json!({"v": 1})).await.unwrap();
    store.set("b/x/items/2", json!({"v": 2})).await.unwrap();

    let mut watch = count_watch(&store, &["a/x/items", "b/x/items"]);
    wait_count(&mut watch, 2).await;

    assert!(watch.retarget(vec!["a/x/items".into()]));
    assert_eq!(wait_count(&mut watch, 1).await, 1);

    // 已移出的分片再变化不影响结果
    store.set("b/x/items/3", json!({"v": 3})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(watch.current(), 1);
}

#[tokio::test]
async fn test_dispose_stops_all_updates() {
    let store = MemoryStore::new();
    store.set("a/x/items/1", json!({"v": 1})).await.unwrap();

    let mut watch = count_watch(&store, &["a/x/items"]);
    wait_count(&mut watch, 1).await;

    watch.dispose();
    assert!(!watch.is_active());
    store.set("a/x/items/2", json!({"v": 2})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(watch.current(), 1);

    // 释放后不再接受重定向
    assert!(!watch.retarget(vec!["b/x/items".into()]));
}

#[tokio::test]
async fn test_undecodable_documents_are_skipped() {
    #[derive(serde::Deserialize)]
    struct Item {
        #[allow(dead_code)]
        v: i64,
    }

    let store = MemoryStore::new();
    store.set("a/x/items/1", json!({"v": 1})).await.unwrap();
    store.set("a/x/items/2", json!({"other": true})).await.unwrap();

    let mut watch: CellWatch<Item, usize> = CellWatch::start(
        Arc::new(store.clone()),
        vec!["a/x/items".into()],
        collection_query(),
        0,
        |snapshots: &ShardSnapshots<Item>| snapshots.items().count(),
    );
    let count = tokio::time::timeout(Duration::from_secs(2), watch.wait_for(|n| *n > 0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn test_cell_span_sizes() {
    assert_eq!(CellSpan::single(30).cell_ids(0.5, 0.5).len(), 1);
    let all = CellSpan::neighborhood(30).cell_ids(0.5, 0.5);
    assert_eq!(all.len(), 9);
    assert_eq!(all[0], CellSpan::single(30).cell_ids(0.5, 0.5)[0]);
}

#[tokio::test]
async fn test_update_position_only_rebuilds_on_cell_change() {
    let store = MemoryStore::new();
    let watch: CellWatch<Value, usize> = CellWatch::around(
        Arc::new(store),
        CellSpan::neighborhood(30),
        0.5,
        0.5,
        collection_query(),
        0,
        |snapshots: &ShardSnapshots<Value>| snapshots.items().count(),
    );
    // 同一格内移动
    assert!(!watch.update_position(0.5 + 5.0 / 3600.0, 0.5));
    // 跨格
    assert!(watch.update_position(0.6, 0.6));
    assert_eq!(watch.shard_keys(), CellSpan::neighborhood(30).cell_ids(0.6, 0.6));
}
