//! 分片扇出订阅
//!
//! 每个分片键一个转发任务，快照解码后作为该分片的最新状态保存，
//! 然后在同一把锁内从所有分片的最新状态重新计算聚合结果。
//! 各分片推送顺序、频率互不相关，聚合从不依赖到达顺序。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::store::{DocumentStore, Query, Snapshot};

/// 单个分片上的订阅错误，不影响其它分片
#[derive(Debug)]
pub struct WatchError {
    pub shard: String,
    pub error: StoreError,
}

pub type QueryFactory = Arc<dyn Fn(&str) -> Query + Send + Sync>;

pub type Publisher<T> = Box<dyn FnMut(&ShardSnapshots<T>) + Send>;

/// 各分片最近一次快照，按分片键顺序遍历
#[derive(Debug)]
pub struct ShardSnapshots<T> {
    order: Vec<String>,
    shards: HashMap<String, Vec<T>>,
}

impl<T> ShardSnapshots<T> {
    fn new(order: Vec<String>) -> Self {
        Self {
            order,
            shards: HashMap::new(),
        }
    }

    fn replace(&mut self, shard: &str, items: Vec<T>) {
        self.shards.insert(shard.to_string(), items);
    }

    fn retain(&mut self, order: &[String]) {
        self.shards.retain(|shard, _| order.contains(shard));
        self.order = order.to_vec();
    }

    /// 已收到快照的分片，按分片键顺序
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[T])> {
        self.order.iter().filter_map(|shard| {
            self.shards
                .get(shard)
                .map(|items| (shard.as_str(), items.as_slice()))
        })
    }

    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.iter().flat_map(|(_, items)| items.iter())
    }

    /// 已收到至少一次快照的分片数
    pub fn reported(&self) -> usize {
        self.shards.len()
    }
}

struct FanoutShared<T> {
    active: bool,
    tokens: HashMap<String, u64>,
    snapshots: ShardSnapshots<T>,
    publish: Publisher<T>,
}

impl<T> FanoutShared<T> {
    fn accepts(&self, shard: &str, token: u64) -> bool {
        self.active && self.tokens.get(shard) == Some(&token)
    }

    fn republish(&mut self) {
        let FanoutShared {
            snapshots, publish, ..
        } = self;
        publish(snapshots);
    }
}

fn lock<T>(shared: &Mutex<FanoutShared<T>>) -> MutexGuard<'_, FanoutShared<T>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 去重并保持顺序（极点附近的邻格可能重复）
fn dedupe(keys: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        if !unique.contains(&key) {
            unique.push(key);
        }
    }
    unique
}

/// 一组可取消的分片订阅，唯一的释放入口是 `dispose`
pub struct ShardFanout<T> {
    store: Arc<dyn DocumentStore>,
    make_query: QueryFactory,
    shared: Arc<Mutex<FanoutShared<T>>>,
    tasks: HashMap<String, JoinHandle<()>>,
    keys: Vec<String>,
    next_token: u64,
    errors: mpsc::UnboundedSender<WatchError>,
}

impl<T> ShardFanout<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn start(
        store: Arc<dyn DocumentStore>,
        keys: Vec<String>,
        make_query: QueryFactory,
        publish: Publisher<T>,
        errors: mpsc::UnboundedSender<WatchError>,
    ) -> Self {
        let mut fanout = Self {
            store,
            make_query,
            shared: Arc::new(Mutex::new(FanoutShared {
                active: true,
                tokens: HashMap::new(),
                snapshots: ShardSnapshots::new(Vec::new()),
                publish,
            })),
            tasks: HashMap::new(),
            keys: Vec::new(),
            next_token: 0,
            errors,
        };
        fanout.apply(dedupe(keys));
        fanout
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn is_active(&self) -> bool {
        lock(&self.shared).active
    }

    /// 切换到新的分片集合。
    /// 集合不变（忽略顺序）时什么也不做并返回 false。
    /// 保留仍在集合内的分片订阅及其状态，只取消移出的、启动新增的。
    pub fn retarget(&mut self, keys: Vec<String>) -> bool {
        let keys = dedupe(keys);
        let unchanged =
            keys.len() == self.keys.len() && keys.iter().all(|key| self.keys.contains(key));
        if unchanged || !self.is_active() {
            return false;
        }
        self.apply(keys);
        true
    }

    fn apply(&mut self, keys: Vec<String>) {
        let mut shared = lock(&self.shared);

        let removed: Vec<String> = self
            .keys
            .iter()
            .filter(|key| !keys.contains(key))
            .cloned()
            .collect();
        for key in &removed {
            if let Some(task) = self.tasks.remove(key) {
                task.abort();
            }
            shared.tokens.remove(key);
        }
        shared.snapshots.retain(&keys);

        for key in &keys {
            if self.tasks.contains_key(key) {
                continue;
            }
            self.next_token += 1;
            let token = self.next_token;
            shared.tokens.insert(key.clone(), token);

            let task = tokio::spawn(forward_shard::<T>(
                self.store.clone(),
                (self.make_query)(key.as_str()),
                key.clone(),
                token,
                self.shared.clone(),
                self.errors.clone(),
            ));
            self.tasks.insert(key.clone(), task);
        }

        tracing::debug!(
            "Shard fan-out now watching {} shards ({} removed)",
            keys.len(),
            removed.len()
        );
        self.keys = keys;

        // 移出的分片不再计入聚合
        if !removed.is_empty() {
            shared.republish();
        }
    }

    /// 同步取消所有分片订阅；返回后不会再有任何快照修改聚合结果
    pub fn dispose(&mut self) {
        let mut shared = lock(&self.shared);
        if !shared.active {
            return;
        }
        shared.active = false;
        shared.tokens.clear();
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
        tracing::debug!("Shard fan-out disposed ({} shards)", self.keys.len());
    }
}

impl<T> Drop for ShardFanout<T> {
    fn drop(&mut self) {
        let mut shared = lock(&self.shared);
        shared.active = false;
        shared.tokens.clear();
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

fn decode_snapshot<T: DeserializeOwned>(snapshot: Snapshot) -> Vec<T> {
    snapshot
        .into_iter()
        .filter_map(|doc| match serde_json::from_value::<T>(doc.data) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!("Skipping undecodable document {}: {}", doc.path, e);
                None
            }
        })
        .collect()
}

async fn forward_shard<T: DeserializeOwned>(
    store: Arc<dyn DocumentStore>,
    query: Query,
    shard: String,
    token: u64,
    shared: Arc<Mutex<FanoutShared<T>>>,
    errors: mpsc::UnboundedSender<WatchError>,
) {
    let mut subscription = match store.subscribe(query).await {
        Ok(subscription) => subscription,
        Err(error) => {
            tracing::warn!("Failed to subscribe to shard {}: {}", shard, error);
            if lock(&shared).accepts(&shard, token) {
                let _ = errors.send(WatchError { shard, error });
            }
            return;
        }
    };

    while let Some(event) = subscription.next().await {
        match event {
            Ok(snapshot) => {
                let items = decode_snapshot::<T>(snapshot);
                let mut guard = lock(&shared);
                if !guard.accepts(&shard, token) {
                    return;
                }
                guard.snapshots.replace(&shard, items);
                guard.republish();
            }
            Err(error) => {
                if !lock(&shared).accepts(&shard, token) {
                    return;
                }
                tracing::warn!("Subscription error on shard {}: {}", shard, error);
                let _ = errors.send(WatchError {
                    shard: shard.clone(),
                    error,
                });
            }
        }
    }
}
