#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ridecell::AppState;
use ridecell::config::Config;
use ridecell::error::StoreError;
use ridecell::profile::StaticProfiles;
use ridecell::store::{Document, DocumentStore, MemoryStore, Query, Snapshot, Subscription};
use serde_json::Value;

pub fn memory_state(store: &MemoryStore, profiles: StaticProfiles) -> AppState {
    AppState::new(Arc::new(store.clone()), Arc::new(profiles), Config::default())
}

pub fn config() -> Arc<Config> {
    Arc::new(Config::default())
}

/// 轮询直到条件成立，超时则 panic
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// 统计 set 调用次数的存储
#[derive(Clone, Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    pub sets: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn set(&self, path: &str, data: Value) -> Result<(), StoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(path, data).await
    }

    async fn set_merge(&self, path: &str, fields: Value) -> Result<(), StoreError> {
        self.inner.set_merge(path, fields).await
    }

    async fn update(&self, path: &str, fields: Value) -> Result<(), StoreError> {
        self.inner.update(path, fields).await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.inner.delete(path).await
    }

    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(path).await
    }

    async fn query(&self, query: &Query) -> Result<Snapshot, StoreError> {
        self.inner.query(query).await
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        self.inner.subscribe(query).await
    }
}

/// 对路径包含指定片段的订阅直接报错，其余转发给内存存储
#[derive(Clone)]
pub struct FailingStore {
    pub inner: MemoryStore,
    pub poisoned: String,
}

#[async_trait]
impl DocumentStore for FailingStore {
    async fn set(&self, path: &str, data: Value) -> Result<(), StoreError> {
        self.inner.set(path, data).await
    }

    async fn set_merge(&self, path: &str, fields: Value) -> Result<(), StoreError> {
        self.inner.set_merge(path, fields).await
    }

    async fn update(&self, path: &str, fields: Value) -> Result<(), StoreError> {
        self.inner.update(path, fields).await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.inner.delete(path).await
    }

    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(path).await
    }

    async fn query(&self, query: &Query) -> Result<Snapshot, StoreError> {
        self.inner.query(query).await
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        if format!("{:?}", query.scope).contains(&self.poisoned) {
            return Err(StoreError::InvalidPath(self.poisoned.clone()));
        }
        self.inner.subscribe(query).await
    }
}
