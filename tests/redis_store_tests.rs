//! 需要可用的 Redis：`REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`

use std::env;

use ridecell::error::StoreError;
use ridecell::store::{DocumentStore, RedisStore};
use serde_json::json;
use uuid::Uuid;

fn store() -> RedisStore {
    let url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    RedisStore::open(&url).unwrap()
}

fn request_path() -> String {
    format!("cells/test-{}/requests/r1", Uuid::new_v4())
}

#[tokio::test]
#[ignore = "requires a running redis"]
async fn concurrent_merges_of_different_fields_all_survive() {
    let store = store();
    let path = request_path();
    store.set(&path, json!({"status": "open"})).await.unwrap();

    let mut writers = Vec::new();
    for i in 0..50 {
        let store = store.clone();
        let path = path.clone();
        writers.push(tokio::spawn(async move {
            store
                .set_merge(&path, json!({ format!("field{i}"): i }))
                .await
                .unwrap();
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    let data = store.get(&path).await.unwrap().unwrap().data;
    assert_eq!(data["status"], "open");
    for i in 0..50 {
        assert_eq!(data[format!("field{i}")], i, "field{i} lost");
    }
    store.delete(&path).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running redis"]
async fn heartbeat_after_assignment_keeps_status() {
    let store = store();
    let path = request_path();
    store
        .set(&path, json!({"status": "open", "lastHeartbeat": 1}))
        .await
        .unwrap();

    store
        .update(&path, json!({"status": "assigned", "assignedDriverUid": "driver"}))
        .await
        .unwrap();
    store.update(&path, json!({"lastHeartbeat": 2})).await.unwrap();

    let data = store.get(&path).await.unwrap().unwrap().data;
    assert_eq!(
        data,
        json!({"status": "assigned", "assignedDriverUid": "driver", "lastHeartbeat": 2})
    );
    store.delete(&path).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running redis"]
async fn update_of_missing_document_is_not_found() {
    let store = store();
    let path = request_path();

    let err = store.update(&path, json!({"status": "open"})).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    assert!(store.get(&path).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a running redis"]
async fn set_replaces_every_field() {
    let store = store();
    let path = request_path();
    store.set(&path, json!({"a": 1, "b": 2})).await.unwrap();
    store.set(&path, json!({"c": 3})).await.unwrap();

    let data = store.get(&path).await.unwrap().unwrap().data;
    assert_eq!(data, json!({"c": 3}));
    store.delete(&path).await.unwrap();
}
