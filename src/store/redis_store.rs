//! Redis 文档存储
//!
//! 每个文档存为哈希 `doc:{path}`，一个顶层字段对应一个哈希字段，值为该字段的 JSON。
//! 集合与集合组各维护一个索引集合，每次写入/删除向 `chg:{collection}` 发布变更；
//! 订阅通过 pub/sub 驱动重新查询。
//! 写入由一段 Lua 脚本在服务端一次完成：覆盖或合并字段、设置过期时间、
//! 更新索引、发布变更。只改部分字段的写入不会覆盖其它写入者的字段。
//! 带 `expiresAt`（毫秒）的文档设置 EXPIREAT，由 Redis 负责过期回收；
//! 过期后索引中残留的路径在查询时顺带清理。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{AsyncCommands, Client as RedisClient, Script};
use serde_json::{Map, Value};

use super::keys;
use super::{
    Document, DocumentStore, Query, Scope, Snapshot, Subscription, apply_query, group_of,
    split_path,
};
use crate::error::StoreError;

/// KEYS: 文档键, 集合索引, 集合组索引
/// ARGV: 模式, 路径, 变更频道, EXPIREAT 秒（空串表示不设置）, 字段1, 值1, ...
const WRITE_SCRIPT: &str = r"
local mode = ARGV[1]
if mode == 'update' and redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
if mode == 'set' then
    redis.call('DEL', KEYS[1])
end
if #ARGV > 4 then
    redis.call('HSET', KEYS[1], unpack(ARGV, 5))
end
if ARGV[4] ~= '' then
    redis.call('EXPIREAT', KEYS[1], ARGV[4])
end
redis.call('SADD', KEYS[2], ARGV[2])
redis.call('SADD', KEYS[3], ARGV[2])
redis.call('PUBLISH', ARGV[3], ARGV[2])
return 1
";

/// 写入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    /// 整体覆盖
    Set,
    /// 浅合并，不存在则创建
    Merge,
    /// 浅合并，不存在则不写
    Update,
}

impl WriteMode {
    fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Set => "set",
            WriteMode::Merge => "merge",
            WriteMode::Update => "update",
        }
    }
}

/// 顶层字段逐个编码为 (字段名, JSON)；只携带本次写入的字段
fn encode_fields(path: &str, data: &Value) -> Result<Vec<(String, String)>, StoreError> {
    let Value::Object(fields) = data else {
        return Err(StoreError::InvalidDocument(path.to_string()));
    };
    fields
        .iter()
        .map(|(field, value)| {
            let json = serde_json::to_string(value)?;
            Ok::<_, StoreError>((field.clone(), json))
        })
        .collect()
}

/// 哈希为空表示文档不存在
fn decode_fields(raw: HashMap<String, String>) -> Result<Option<Value>, StoreError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let mut fields = Map::with_capacity(raw.len());
    for (field, json) in raw {
        fields.insert(field, serde_json::from_str(&json)?);
    }
    Ok(Some(Value::Object(fields)))
}

fn expire_at_arg(data: &Value) -> String {
    data.get("expiresAt")
        .and_then(Value::as_i64)
        .map(|expires_at_ms| (expires_at_ms / 1000).to_string())
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct RedisStore {
    redis: Arc<RedisClient>,
    write_script: Script,
}

impl RedisStore {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self {
            redis,
            write_script: Script::new(WRITE_SCRIPT),
        }
    }

    pub fn open(redis_url: &str) -> Result<Self, StoreError> {
        let client = RedisClient::open(redis_url)?;
        Ok(Self::new(Arc::new(client)))
    }

    /// 返回 false 表示 `Update` 模式下文档不存在
    async fn write(&self, path: &str, data: &Value, mode: WriteMode) -> Result<bool, StoreError> {
        let (collection, _) = split_path(path)?;
        let fields = encode_fields(path, data)?;
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let mut invocation = self.write_script.prepare_invoke();
        invocation
            .key(keys::document_key(path))
            .key(keys::collection_index_key(collection))
            .key(keys::group_index_key(group_of(collection)))
            .arg(mode.as_str())
            .arg(path)
            .arg(keys::change_channel(collection))
            .arg(expire_at_arg(data));
        for (field, json) in &fields {
            invocation.arg(field).arg(json);
        }

        let written: i64 = invocation.invoke_async(&mut conn).await?;
        if written > 0 {
            tracing::debug!("Stored document ({}): {}", mode.as_str(), path);
        }
        Ok(written > 0)
    }
}

#[async_trait]
impl DocumentStore for RedisStore {
    async fn set(&self, path: &str, data: Value) -> Result<(), StoreError> {
        self.write(path, &data, WriteMode::Set).await.map(|_| ())
    }

    async fn set_merge(&self, path: &str, fields: Value) -> Result<(), StoreError> {
        self.write(path, &fields, WriteMode::Merge).await.map(|_| ())
    }

    async fn update(&self, path: &str, fields: Value) -> Result<(), StoreError> {
        if self.write(path, &fields, WriteMode::Update).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(path.to_string()))
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let (collection, _) = split_path(path)?;
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let removed: i64 = conn.del(keys::document_key(path)).await?;
        let _: () = conn
            .srem(keys::collection_index_key(collection), path)
            .await?;
        let _: () = conn
            .srem(keys::group_index_key(group_of(collection)), path)
            .await?;
        if removed > 0 {
            let _: () = conn.publish(keys::change_channel(collection), path).await?;
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        split_path(path)?;
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let raw: HashMap<String, String> = conn.hgetall(keys::document_key(path)).await?;
        decode_fields(raw)?
            .map(|data| Document::new(path, data))
            .transpose()
    }

    async fn query(&self, query: &Query) -> Result<Snapshot, StoreError> {
        let index = match &query.scope {
            Scope::Collection(collection) => keys::collection_index_key(collection),
            Scope::Group(group) => keys::group_index_key(group),
        };

        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let paths: Vec<String> = conn.smembers(&index).await?;
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for path in &paths {
            pipe.hgetall(keys::document_key(path));
        }
        let raws: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        let mut documents = Vec::with_capacity(paths.len());
        let mut vanished = Vec::new();
        for (path, raw) in paths.into_iter().zip(raws) {
            match decode_fields(raw) {
                Ok(Some(data)) => match Document::new(path, data) {
                    Ok(document) => documents.push(document),
                    Err(e) => tracing::warn!("Skipping document with bad path: {}", e),
                },
                Ok(None) => vanished.push(path),
                Err(e) => tracing::warn!("Skipping undecodable document {}: {}", path, e),
            }
        }

        // 已过期文档残留在索引里，顺带清理
        if !vanished.is_empty() {
            let cleanup: redis::RedisResult<()> = conn.srem(&index, &vanished).await;
            if let Err(e) = cleanup {
                tracing::warn!("Failed to prune index {}: {}", index, e);
            }
        }

        Ok(apply_query(documents, query))
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        let mut pubsub = self.redis.get_async_pubsub().await?;
        match &query.scope {
            Scope::Collection(collection) => {
                pubsub.subscribe(keys::change_channel(collection)).await?
            }
            Scope::Group(group) => pubsub.psubscribe(keys::group_change_pattern(group)).await?,
        }

        let store = self.clone();
        let (tx, rx) = Subscription::channel();
        let pump = tokio::spawn(async move {
            if tx.send(store.query(&query).await).await.is_err() {
                return;
            }
            let mut messages = pubsub.on_message();
            while messages.next().await.is_some() {
                if tx.send(store.query(&query).await).await.is_err() {
                    return;
                }
            }
            // 连接断开
            let _ = tx.send(Err(StoreError::Closed)).await;
        });

        Ok(Subscription::new(rx, pump))
    }
}
