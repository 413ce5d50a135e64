//! 内存文档存储
//!
//! 进程内实现，变更通过 broadcast 通知订阅者，主要用于测试和单机开发。

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{
    Document, DocumentStore, Query, Snapshot, Subscription, apply_query, merge_fields, split_path,
};
use crate::error::StoreError;

/// 变更通知缓冲
const CHANGE_BUFFER: usize = 256;

#[derive(Debug)]
struct MemoryInner {
    documents: RwLock<BTreeMap<String, Value>>,
    changes: broadcast::Sender<String>,
}

impl MemoryInner {
    fn run_query(&self, query: &Query) -> Snapshot {
        let documents = self
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let candidates = documents
            .iter()
            .filter_map(|(path, data)| Document::new(path.clone(), data.clone()).ok());
        apply_query(candidates, query)
    }

    fn notify(&self, collection: &str) {
        // 没有订阅者时发送失败，忽略
        let _ = self.changes.send(collection.to_string());
    }
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            inner: Arc::new(MemoryInner {
                documents: RwLock::new(BTreeMap::new()),
                changes,
            }),
        }
    }

    /// 当前文档数
    pub fn len(&self) -> usize {
        self.inner
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self, path: &str, data: Value) -> Result<(), StoreError> {
        let (collection, _) = split_path(path)?;
        self.inner
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), data);
        self.inner.notify(collection);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn set(&self, path: &str, data: Value) -> Result<(), StoreError> {
        self.write(path, data)
    }

    async fn set_merge(&self, path: &str, fields: Value) -> Result<(), StoreError> {
        let (collection, _) = split_path(path)?;
        {
            let mut documents = self
                .inner
                .documents
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let merged = merge_fields(documents.remove(path), fields);
            documents.insert(path.to_string(), merged);
        }
        self.inner.notify(collection);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Value) -> Result<(), StoreError> {
        let (collection, _) = split_path(path)?;
        {
            let mut documents = self
                .inner
                .documents
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let existing = documents
                .remove(path)
                .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
            documents.insert(path.to_string(), merge_fields(Some(existing), fields));
        }
        self.inner.notify(collection);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let (collection, _) = split_path(path)?;
        let removed = self
            .inner
            .documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        if removed.is_some() {
            self.inner.notify(collection);
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        split_path(path)?;
        let data = self
            .inner
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned();
        data.map(|data| Document::new(path, data)).transpose()
    }

    async fn query(&self, query: &Query) -> Result<Snapshot, StoreError> {
        Ok(self.inner.run_query(query))
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        // 先订阅变更再取初始快照，避免漏掉中间的写入
        let mut changes = self.inner.changes.subscribe();
        let initial = self.inner.run_query(&query);
        let inner = self.inner.clone();
        let (tx, rx) = Subscription::channel();

        let pump = tokio::spawn(async move {
            if tx.send(Ok(initial)).await.is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(collection) if !query.scope.matches(&collection) => continue,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Memory subscription lagged by {} changes", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
                let snapshot = inner.run_query(&query);
                if tx.send(Ok(snapshot)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, pump))
    }
}
