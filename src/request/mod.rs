//! 行程请求服务
//!
//! 请求按创建时上车点所在格分片，之后不再迁移。
//! 写操作失败只记录日志；状态机违规与权限不足返回 `RequestError`。
//! 两个司机同时接单不做互斥，后写者覆盖，输的一方从 `watch_request` 看到结果。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::config::Config;
use crate::error::{RequestError, StoreError};
use crate::geocell::{compute_canonical, compute_cell_id};
use crate::models::{
    HistoryEntry, HistoryRole, LocationPoint, RequestRef, RequestStatus, RideRequest,
};
use crate::profile::{
    DEFAULT_CLIENT_NAME, DEFAULT_DRIVER_NAME, ProfileLookup, resolve_display_name,
};
use crate::store::{DocumentStore, Query, keys};
use crate::utils::now_millis;
use crate::watch::{CellSpan, CellWatch, ExpandingWatch, QueryFactory, ShardSnapshots};

/// 合并后的 open 请求列表
pub type OpenRequestWatch = CellWatch<RideRequest, Vec<RideRequest>>;

pub type ExpandingRequestWatch = ExpandingWatch<RideRequest, Vec<RideRequest>>;

/// 单个请求
pub type RequestWatch = CellWatch<RideRequest, Option<RideRequest>>;

/// 我的进行中请求（跨分片）
const MY_REQUESTS_SHARD: &str = "mine";

/// 按 requestId 合并（后出现者覆盖），丢弃非 open 与过期请求，按 createdAt 倒序
pub fn merge_open_requests<'a>(
    requests: impl IntoIterator<Item = &'a RideRequest>,
    now: DateTime<Utc>,
    stale: chrono::Duration,
) -> Vec<RideRequest> {
    let mut by_id: HashMap<&str, &RideRequest> = HashMap::new();
    for request in requests {
        by_id.insert(request.request_id.as_str(), request);
    }

    let mut merged: Vec<RideRequest> = by_id
        .into_values()
        .filter(|request| request.status == RequestStatus::Open && request.is_fresh_at(now, stale))
        .cloned()
        .collect();
    merged.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.request_id.cmp(&b.request_id))
    });
    merged
}

fn open_requests_query() -> QueryFactory {
    Arc::new(|cell_id: &str| {
        Query::collection(keys::requests_collection(cell_id))
            .where_eq("status", RequestStatus::Open.as_str())
            .order_by_desc("createdAt")
    })
}

fn history_entry(request: &RideRequest, role: HistoryRole) -> HistoryEntry {
    let at = Some(request.updated_at);
    HistoryEntry {
        ride_id: request.request_id.clone(),
        role,
        status: request.status,
        cell_id: request.cell_id.clone(),
        pickup: request.pickup.clone(),
        dropoff: request.dropoff.clone(),
        client_name: request.client_name.clone(),
        driver_name: request.driver_name.clone(),
        created_at: request.created_at,
        accepted_at: at.filter(|_| request.status == RequestStatus::Assigned),
        completed_at: at.filter(|_| request.status == RequestStatus::Completed),
        cancelled_at: at.filter(|_| request.status == RequestStatus::Cancelled),
        updated_at: request.updated_at,
    }
}

pub struct RequestService {
    uid: String,
    store: Arc<dyn DocumentStore>,
    profiles: Arc<dyn ProfileLookup>,
    config: Arc<Config>,
}

impl RequestService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        profiles: Arc<dyn ProfileLookup>,
        config: Arc<Config>,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            store,
            profiles,
            config,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// 在上车点所在格创建 open 请求；写失败时返回 None
    pub async fn create_request(
        &self,
        pickup: LocationPoint,
        dropoff: Option<LocationPoint>,
    ) -> Option<RideRequest> {
        let client_name =
            resolve_display_name(self.profiles.as_ref(), &self.uid, DEFAULT_CLIENT_NAME).await;
        let cell_id = compute_cell_id(&compute_canonical(
            pickup.lat,
            pickup.lng,
            self.config.cell_step_seconds,
        ));
        let now = now_millis();

        let request = RideRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            created_by_uid: self.uid.clone(),
            pickup,
            dropoff,
            status: RequestStatus::Open,
            assigned_driver_uid: None,
            created_at: now,
            updated_at: now,
            cell_id,
            expires_at: now + self.config.record_ttl(),
            driver_lat: None,
            driver_lng: None,
            driver_location_updated_at: None,
            last_heartbeat: Some(now),
            client_name: Some(client_name),
            driver_name: None,
        };

        let path = keys::request_path(&request.cell_id, &request.request_id);
        let written = match serde_json::to_value(&request) {
            Ok(data) => self.store.set(&path, data).await,
            Err(e) => Err(StoreError::from(e)),
        };
        if let Err(e) = written {
            tracing::warn!("Failed to create request {}: {}", path, e);
            return None;
        }
        tracing::debug!("Request {} created by {}", path, self.uid);

        self.write_history(&self.uid, &history_entry(&request, HistoryRole::Client))
            .await;
        Some(request)
    }

    /// 只刷新 lastHeartbeat
    pub async fn update_heartbeat(&self, reference: &RequestRef) -> bool {
        let fields = json!({ "lastHeartbeat": Utc::now().timestamp_millis() });
        self.write_fields(reference, fields).await
    }

    /// 读取单个请求；不存在时返回 None
    pub async fn get_request(
        &self,
        reference: &RequestRef,
    ) -> Result<Option<RideRequest>, StoreError> {
        let path = keys::request_path(&reference.cell_id, &reference.request_id);
        match self.store.get(&path).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc.data)?)),
            None => Ok(None),
        }
    }

    /// open → assigned
    pub async fn assign_driver(
        &self,
        reference: &RequestRef,
        driver_uid: &str,
    ) -> Result<Option<RideRequest>, RequestError> {
        let Some(mut request) = self.prepare(reference, RequestStatus::Assigned).await? else {
            return Ok(None);
        };
        let driver_name =
            resolve_display_name(self.profiles.as_ref(), driver_uid, DEFAULT_DRIVER_NAME).await;
        let now = now_millis();

        request.status = RequestStatus::Assigned;
        request.assigned_driver_uid = Some(driver_uid.to_string());
        request.driver_name = Some(driver_name.clone());
        request.updated_at = now;

        let fields = json!({
            "status": RequestStatus::Assigned.as_str(),
            "assignedDriverUid": driver_uid,
            "driverName": driver_name,
            "updatedAt": now.timestamp_millis(),
        });
        Ok(self.commit(request, fields).await)
    }

    /// assigned → completed，仅限被指派的司机
    pub async fn complete_request(
        &self,
        reference: &RequestRef,
    ) -> Result<Option<RideRequest>, RequestError> {
        self.finish(reference, RequestStatus::Completed).await
    }

    /// open → cancelled（仅创建者），assigned → cancelled（创建者或司机）
    pub async fn cancel_request(
        &self,
        reference: &RequestRef,
    ) -> Result<Option<RideRequest>, RequestError> {
        self.finish(reference, RequestStatus::Cancelled).await
    }

    /// 覆盖司机位置；只在 assigned 状态下有意义，不做校验
    pub async fn update_driver_location(
        &self,
        reference: &RequestRef,
        lat: f64,
        lng: f64,
    ) -> bool {
        let now = Utc::now().timestamp_millis();
        let fields = json!({
            "driverLat": lat,
            "driverLng": lng,
            "driverLocationUpdatedAt": now,
            "updatedAt": now,
        });
        self.write_fields(reference, fields).await
    }

    /// 所在格（或 9 格）的 open 请求，合并去重后按创建时间倒序
    pub fn watch_open_requests(
        &self,
        lat: f64,
        lng: f64,
        include_neighbors: bool,
    ) -> OpenRequestWatch {
        let span = CellSpan {
            step_seconds: self.config.cell_step_seconds,
            include_neighbors,
        };
        let stale = self.config.request_stale();
        CellWatch::around(
            self.store.clone(),
            span,
            lat,
            lng,
            open_requests_query(),
            Vec::new(),
            move |snapshots: &ShardSnapshots<RideRequest>| {
                merge_open_requests(snapshots.items(), Utc::now(), stale)
            },
        )
    }

    /// 先看所在格，`expand_delay` 后扩到 9 格
    pub fn watch_open_requests_with_expansion(
        &self,
        lat: f64,
        lng: f64,
        expand_delay: Duration,
    ) -> ExpandingRequestWatch {
        let stale = self.config.request_stale();
        ExpandingWatch::start(
            self.store.clone(),
            self.config.cell_step_seconds,
            lat,
            lng,
            expand_delay,
            open_requests_query(),
            Vec::new(),
            move |snapshots: &ShardSnapshots<RideRequest>| {
                merge_open_requests(snapshots.items(), Utc::now(), stale)
            },
        )
    }

    /// 我创建的 open / assigned 请求；跨所有分片查询
    pub fn watch_my_requests(&self) -> OpenRequestWatch {
        let query = self.my_requests_query();
        CellWatch::start(
            self.store.clone(),
            vec![MY_REQUESTS_SHARD.to_string()],
            Arc::new(move |_: &str| query.clone()),
            Vec::new(),
            |snapshots: &ShardSnapshots<RideRequest>| {
                snapshots.items().cloned().collect::<Vec<_>>()
            },
        )
    }

    pub fn watch_request(&self, reference: &RequestRef) -> RequestWatch {
        let request_id = reference.request_id.clone();
        CellWatch::start(
            self.store.clone(),
            vec![reference.cell_id.clone()],
            Arc::new(move |cell_id: &str| {
                Query::collection(keys::requests_collection(cell_id))
                    .where_eq("requestId", request_id.as_str())
            }),
            None,
            |snapshots: &ShardSnapshots<RideRequest>| snapshots.items().next().cloned(),
        )
    }

    /// 一次性读取 open 请求
    pub async fn fetch_open_requests(
        &self,
        lat: f64,
        lng: f64,
        include_neighbors: bool,
    ) -> Result<Vec<RideRequest>, StoreError> {
        let span = CellSpan {
            step_seconds: self.config.cell_step_seconds,
            include_neighbors,
        };
        let make_query = open_requests_query();
        let mut cells: Vec<String> = Vec::new();
        for cell_id in span.cell_ids(lat, lng) {
            if !cells.contains(&cell_id) {
                cells.push(cell_id);
            }
        }

        let mut requests = Vec::new();
        for cell_id in &cells {
            requests.extend(decode_requests(
                self.store.query(&make_query(cell_id.as_str())).await?,
            ));
        }
        Ok(merge_open_requests(
            &requests,
            Utc::now(),
            self.config.request_stale(),
        ))
    }

    pub async fn fetch_my_requests(&self) -> Result<Vec<RideRequest>, StoreError> {
        let docs = self.store.query(&self.my_requests_query()).await?;
        Ok(decode_requests(docs))
    }

    fn my_requests_query(&self) -> Query {
        Query::group(keys::REQUESTS_GROUP)
            .where_eq("createdByUid", self.uid.as_str())
            .where_in(
                "status",
                [RequestStatus::Open.as_str(), RequestStatus::Assigned.as_str()],
            )
            .order_by_desc("createdAt")
    }

    /// 读取并校验状态迁移与权限
    async fn prepare(
        &self,
        reference: &RequestRef,
        to: RequestStatus,
    ) -> Result<Option<RideRequest>, RequestError> {
        let request = match self.get_request(reference).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!("Failed to load request {}: {}", reference, e);
                return Ok(None);
            }
        };

        if !request.status.can_transition_to(to) {
            return Err(RequestError::InvalidTransition {
                from: request.status,
                to,
            });
        }

        let is_creator = request.created_by_uid == self.uid;
        let is_driver = request.assigned_driver_uid.as_deref() == Some(self.uid.as_str());
        let permitted = match (request.status, to) {
            (RequestStatus::Open, RequestStatus::Assigned) => true,
            (RequestStatus::Open, RequestStatus::Cancelled) => is_creator,
            (RequestStatus::Assigned, RequestStatus::Cancelled) => is_creator || is_driver,
            (RequestStatus::Assigned, RequestStatus::Completed) => is_driver,
            _ => false,
        };
        if !permitted {
            return Err(RequestError::NotPermitted {
                uid: self.uid.clone(),
                to,
            });
        }
        Ok(Some(request))
    }

    async fn finish(
        &self,
        reference: &RequestRef,
        to: RequestStatus,
    ) -> Result<Option<RideRequest>, RequestError> {
        let Some(mut request) = self.prepare(reference, to).await? else {
            return Ok(None);
        };
        let now = now_millis();
        request.status = to;
        request.updated_at = now;

        let fields = json!({
            "status": to.as_str(),
            "updatedAt": now.timestamp_millis(),
        });
        Ok(self.commit(request, fields).await)
    }

    /// 写入状态变更，并为乘客与司机记录历史
    async fn commit(&self, request: RideRequest, fields: Value) -> Option<RideRequest> {
        if !self.write_fields(&request.reference(), fields).await {
            return None;
        }
        tracing::debug!("Request {} is now {}", request.reference(), request.status);

        self.write_history(
            &request.created_by_uid,
            &history_entry(&request, HistoryRole::Client),
        )
        .await;
        if let Some(driver_uid) = &request.assigned_driver_uid {
            self.write_history(driver_uid, &history_entry(&request, HistoryRole::Driver))
                .await;
        }
        Some(request)
    }

    async fn write_fields(&self, reference: &RequestRef, fields: Value) -> bool {
        let path = keys::request_path(&reference.cell_id, &reference.request_id);
        match self.store.update(&path, fields).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to update request {}: {}", path, e);
                false
            }
        }
    }

    async fn write_history(&self, uid: &str, entry: &HistoryEntry) {
        let path = keys::history_path(uid, &entry.ride_id);
        let written = match serde_json::to_value(entry) {
            Ok(data) => self.store.set_merge(&path, data).await,
            Err(e) => Err(StoreError::from(e)),
        };
        if let Err(e) = written {
            tracing::warn!("Failed to write history {}: {}", path, e);
        }
    }
}

fn decode_requests(docs: Vec<crate::store::Document>) -> Vec<RideRequest> {
    docs.into_iter()
        .filter_map(|doc| match serde_json::from_value::<RideRequest>(doc.data) {
            Ok(request) => Some(request),
            Err(e) => {
                tracing::warn!("Skipping undecodable request {}: {}", doc.path, e);
                None
            }
        })
        .collect()
}
