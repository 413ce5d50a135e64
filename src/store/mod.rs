//! 文档存储
//!
//! 外部实时文档服务的抽象：增删改、单点读取、查询，以及快照式订阅。
//! 订阅先推送当前结果集，之后每次作用域内有变更都推送重新求值后的完整结果集。

pub mod keys;
mod memory;
mod redis_store;

use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::StoreError;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// 订阅缓冲的快照数
const SUBSCRIPTION_BUFFER: usize = 16;

/// 一条文档
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: String,
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(path: impl Into<String>, data: Value) -> Result<Self, StoreError> {
        let path = path.into();
        let (_, id) = split_path(&path)?;
        let id = id.to_string();
        Ok(Self { path, id, data })
    }

    pub fn collection(&self) -> &str {
        // path 已在构造时校验
        self.path
            .rsplit_once('/')
            .map(|(collection, _)| collection)
            .unwrap_or_default()
    }
}

pub type Snapshot = Vec<Document>;

pub type SnapshotSender = mpsc::Sender<Result<Snapshot, StoreError>>;
pub type SnapshotReceiver = mpsc::Receiver<Result<Snapshot, StoreError>>;

/// 拆分文档路径为 (集合路径, 文档ID)；路径段数必须为偶数
pub fn split_path(path: &str) -> Result<(&str, &str), StoreError> {
    let segments = path.split('/').count();
    if segments < 2 || segments % 2 != 0 || path.split('/').any(str::is_empty) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    path.rsplit_once('/')
        .ok_or_else(|| StoreError::InvalidPath(path.to_string()))
}

/// 集合组名：集合路径的最后一段
pub fn group_of(collection: &str) -> &str {
    collection.rsplit('/').next().unwrap_or(collection)
}

/// 查询作用域
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    /// 单个集合，例如 `cells/{cellId}/requests`
    Collection(String),
    /// 所有同名集合，例如全部 `.../requests`
    Group(String),
}

impl Scope {
    pub fn matches(&self, collection: &str) -> bool {
        match self {
            Scope::Collection(path) => path == collection,
            Scope::Group(group) => group_of(collection) == group,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    fn matches(&self, data: &Value) -> bool {
        match self {
            Filter::Eq(field, expected) => data.get(field) == Some(expected),
            Filter::In(field, candidates) => data
                .get(field)
                .is_some_and(|value| candidates.contains(value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub scope: Scope,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn collection(path: impl Into<String>) -> Self {
        Self::with_scope(Scope::Collection(path.into()))
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::with_scope(Scope::Group(name.into()))
    }

    fn with_scope(scope: Scope) -> Self {
        Self {
            scope,
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(field.into(), value.into()));
        self
    }

    pub fn where_in<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filters.push(Filter::In(
            field.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending: true,
        });
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.scope.matches(document.collection())
            && self.filters.iter().all(|filter| filter.matches(&document.data))
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// 对候选文档做过滤、排序
pub fn apply_query(documents: impl IntoIterator<Item = Document>, query: &Query) -> Snapshot {
    let mut matched: Vec<Document> = documents
        .into_iter()
        .filter(|doc| query.matches(doc))
        .collect();

    match &query.order_by {
        Some(order) => matched.sort_by(|a, b| {
            let ordering = compare_values(a.data.get(&order.field), b.data.get(&order.field));
            let ordering = if order.descending {
                // 缺少排序字段的文档始终排在最后
                match (a.data.get(&order.field), b.data.get(&order.field)) {
                    (Some(_), Some(_)) => ordering.reverse(),
                    _ => ordering,
                }
            } else {
                ordering
            };
            ordering.then_with(|| a.path.cmp(&b.path))
        }),
        None => matched.sort_by(|a, b| a.path.cmp(&b.path)),
    }
    matched
}

/// 浅合并：fields 中的顶层字段覆盖 existing
pub fn merge_fields(existing: Option<Value>, fields: Value) -> Value {
    match (existing, fields) {
        (Some(Value::Object(mut base)), Value::Object(patch)) => {
            for (key, value) in patch {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (_, fields) => fields,
    }
}

/// 快照订阅；drop 时取消底层推送任务
pub struct Subscription {
    rx: SnapshotReceiver,
    pump: JoinHandle<()>,
}

impl Subscription {
    pub fn channel() -> (SnapshotSender, SnapshotReceiver) {
        mpsc::channel(SUBSCRIPTION_BUFFER)
    }

    pub fn new(rx: SnapshotReceiver, pump: JoinHandle<()>) -> Self {
        Self { rx, pump }
    }

    /// 下一份快照；订阅结束时返回 None
    pub async fn next(&mut self) -> Option<Result<Snapshot, StoreError>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 创建或整体覆盖
    async fn set(&self, path: &str, data: Value) -> Result<(), StoreError>;

    /// 浅合并，不存在则创建
    async fn set_merge(&self, path: &str, fields: Value) -> Result<(), StoreError>;

    /// 浅合并，文档不存在时返回 `StoreError::NotFound`
    async fn update(&self, path: &str, fields: Value) -> Result<(), StoreError>;

    /// 删除；文档不存在不算错误
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError>;

    async fn query(&self, query: &Query) -> Result<Snapshot, StoreError>;

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(path: &str, data: Value) -> Document {
        Document::new(path, data).unwrap()
    }

    #[test]
    fn test_split_path() {
        assert_eq!(
            split_path("cells/abc/presence/u1").unwrap(),
            ("cells/abc/presence", "u1")
        );
        assert!(split_path("cells/abc/presence").is_err());
        assert!(split_path("cells//presence/u1").is_err());
    }

    #[test]
    fn test_group_scope_matches_nested_collections() {
        let scope = Scope::Group("requests".into());
        assert!(scope.matches("cells/a/requests"));
        assert!(scope.matches("cells/b/requests"));
        assert!(!scope.matches("cells/a/presence"));
    }

    #[test]
    fn test_apply_query_filters_and_orders_desc() {
        let docs = vec![
            doc("cells/a/requests/r1", json!({"status": "open", "createdAt": 10})),
            doc("cells/a/requests/r2", json!({"status": "open", "createdAt": 30})),
            doc("cells/a/requests/r3", json!({"status": "assigned", "createdAt": 20})),
            doc("cells/b/requests/r4", json!({"status": "open", "createdAt": 40})),
        ];
        let query = Query::collection("cells/a/requests")
            .where_eq("status", "open")
            .order_by_desc("createdAt");

        let ids: Vec<String> = apply_query(docs, &query).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["r2", "r1"]);
    }

    #[test]
    fn test_where_in_filter() {
        let docs = vec![
            doc("cells/a/requests/r1", json!({"status": "open"})),
            doc("cells/a/requests/r2", json!({"status": "cancelled"})),
            doc("cells/b/requests/r3", json!({"status": "assigned"})),
        ];
        let query = Query::group("requests").where_in("status", ["open", "assigned"]);
        assert_eq!(apply_query(docs, &query).len(), 2);
    }

    #[test]
    fn test_merge_fields_overwrites_top_level_only() {
        let merged = merge_fields(
            Some(json!({"a": 1, "nested": {"x": 1}})),
            json!({"b": 2, "nested": {"y": 2}}),
        );
        assert_eq!(merged, json!({"a": 1, "b": 2, "nested": {"y": 2}}));
    }
}
