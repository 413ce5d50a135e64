//! 在线状态服务
//!
//! 每个参与者一个实例：offline → online（心跳循环）→ offline。
//! 换格时先删除旧格记录再写新记录，两步不是原子的，
//! 期间可能短暂出现两条记录，读端按 uid 去重。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::error::StoreError;
use crate::geocell::{compute_all_cell_ids, compute_canonical, compute_cell_id};
use crate::location::LocationSource;
use crate::models::{PresenceRecord, Role};
use crate::store::{DocumentStore, Query, keys};
use crate::utils::now_millis;
use crate::watch::{CellSpan, CellWatch, QueryFactory, ShardSnapshots};

/// 每次心跳读取当前行程ID的回调
pub type ActiveRideSource = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// 附近司机列表
pub type DriverListWatch = CellWatch<PresenceRecord, Vec<PresenceRecord>>;

/// 附近司机数量
pub type DriverCountWatch = CellWatch<PresenceRecord, usize>;

/// 过滤掉过期记录，同一 uid 只保留 lastSeen 最新的一条
pub fn fresh_drivers<'a>(
    records: impl IntoIterator<Item = &'a PresenceRecord>,
    now: DateTime<Utc>,
    stale: Duration,
) -> Vec<PresenceRecord> {
    let mut drivers: Vec<PresenceRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        if record.role != Role::Driver || !record.is_fresh_at(now, stale) {
            continue;
        }
        match index.get(&record.uid) {
            Some(&slot) => {
                if record.last_seen > drivers[slot].last_seen {
                    drivers[slot] = record.clone();
                }
            }
            None => {
                index.insert(record.uid.clone(), drivers.len());
                drivers.push(record.clone());
            }
        }
    }
    drivers
}

fn driver_query() -> QueryFactory {
    Arc::new(|cell_id: &str| {
        Query::collection(keys::presence_collection(cell_id))
            .where_eq("role", Role::Driver.as_str())
    })
}

/// 写端：心跳任务与服务本身共享
#[derive(Clone)]
struct PresenceWriter {
    uid: String,
    role: Role,
    store: Arc<dyn DocumentStore>,
    config: Arc<Config>,
    current_cell: Arc<Mutex<Option<String>>>,
}

impl PresenceWriter {
    fn swap_cell(&self, cell_id: Option<String>) -> Option<String> {
        let mut current = self
            .current_cell
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, cell_id)
    }

    fn current_cell(&self) -> Option<String> {
        self.current_cell
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn update_presence(
        &self,
        lat: f64,
        lng: f64,
        active_ride_id: Option<String>,
    ) -> Option<PresenceRecord> {
        let cell_id = compute_cell_id(&compute_canonical(lat, lng, self.config.cell_step_seconds));

        // 换格：尽力删除旧记录，不等待完成
        let previous = self.swap_cell(Some(cell_id.clone()));
        if let Some(previous) = previous.filter(|previous| *previous != cell_id) {
            let store = self.store.clone();
            let path = keys::presence_path(&previous, &self.uid);
            tokio::spawn(async move {
                if let Err(e) = store.delete(&path).await {
                    tracing::warn!("Failed to delete old presence {}: {}", path, e);
                }
            });
        }

        let now = now_millis();
        let record = PresenceRecord {
            uid: self.uid.clone(),
            role: self.role,
            lat,
            lng,
            cell_id: cell_id.clone(),
            active_ride_id,
            last_seen: now,
            expires_at: now + self.config.record_ttl(),
            platform: self.config.client_platform.clone(),
            app: self.config.client_app.clone(),
            updated_at: now,
        };

        let path = keys::presence_path(&cell_id, &self.uid);
        let written = match serde_json::to_value(&record) {
            Ok(data) => self.store.set(&path, data).await,
            Err(e) => Err(StoreError::from(e)),
        };
        match written {
            Ok(()) => {
                tracing::debug!("Presence of {} written to {}", self.uid, path);
                Some(record)
            }
            Err(e) => {
                tracing::warn!("Failed to write presence {}: {}", path, e);
                None
            }
        }
    }
}

pub struct PresenceService {
    writer: PresenceWriter,
    heartbeat: Option<JoinHandle<()>>,
}

impl PresenceService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: Arc<Config>,
        uid: impl Into<String>,
        role: Role,
    ) -> Self {
        Self::with_last_cell(store, config, uid, role, None)
    }

    /// 已知上次所在格（无状态的网关调用方）
    pub fn with_last_cell(
        store: Arc<dyn DocumentStore>,
        config: Arc<Config>,
        uid: impl Into<String>,
        role: Role,
        last_cell: Option<String>,
    ) -> Self {
        Self {
            writer: PresenceWriter {
                uid: uid.into(),
                role,
                store,
                config,
                current_cell: Arc::new(Mutex::new(last_cell)),
            },
            heartbeat: None,
        }
    }

    pub fn uid(&self) -> &str {
        &self.writer.uid
    }

    pub fn role(&self) -> Role {
        self.writer.role
    }

    pub fn current_cell(&self) -> Option<String> {
        self.writer.current_cell()
    }

    /// 写入当前位置的在线记录；写失败时记录日志并返回 None
    pub async fn update_presence(
        &self,
        lat: f64,
        lng: f64,
        active_ride_id: Option<String>,
    ) -> Option<PresenceRecord> {
        self.writer.update_presence(lat, lng, active_ride_id).await
    }

    /// 立即写一次，之后按心跳周期重复；已在运行时先停止旧循环
    pub fn start_heartbeat(
        &mut self,
        location: Arc<dyn LocationSource>,
        active_ride: ActiveRideSource,
    ) {
        self.stop_heartbeat();

        let writer = self.writer.clone();
        let period = writer.config.heartbeat_interval();
        tracing::debug!("Starting presence heartbeat for {}", writer.uid);

        self.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match location.current_location().await {
                    Some(point) => {
                        writer
                            .update_presence(point.lat, point.lng, active_ride())
                            .await;
                    }
                    None => tracing::debug!("No location for heartbeat of {}", writer.uid),
                }
            }
        }));
    }

    pub fn stop_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
            tracing::debug!("Stopped presence heartbeat for {}", self.writer.uid);
        }
    }

    pub fn is_running(&self) -> bool {
        self.heartbeat
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// 停止心跳并删除当前格的记录
    pub async fn go_offline(&mut self) {
        self.stop_heartbeat();
        let Some(cell_id) = self.writer.swap_cell(None) else {
            return;
        };
        let path = keys::presence_path(&cell_id, &self.writer.uid);
        match self.writer.store.delete(&path).await {
            Ok(()) => tracing::debug!("{} went offline", self.writer.uid),
            Err(e) => tracing::warn!("Failed to delete presence {}: {}", path, e),
        }
    }

    /// 9 格内的新鲜司机列表，位置跨格时通过 `update_position` 切换
    pub fn watch_nearby_drivers(&self, lat: f64, lng: f64) -> DriverListWatch {
        let stale = self.writer.config.presence_stale();
        CellWatch::around(
            self.writer.store.clone(),
            CellSpan::neighborhood(self.writer.config.cell_step_seconds),
            lat,
            lng,
            driver_query(),
            Vec::new(),
            move |snapshots: &ShardSnapshots<PresenceRecord>| {
                fresh_drivers(snapshots.items(), Utc::now(), stale)
            },
        )
    }

    pub fn watch_driver_count(&self, lat: f64, lng: f64) -> DriverCountWatch {
        let stale = self.writer.config.presence_stale();
        CellWatch::around(
            self.writer.store.clone(),
            CellSpan::neighborhood(self.writer.config.cell_step_seconds),
            lat,
            lng,
            driver_query(),
            0,
            move |snapshots: &ShardSnapshots<PresenceRecord>| {
                fresh_drivers(snapshots.items(), Utc::now(), stale).len()
            },
        )
    }

    /// 一次性读取 9 格内的新鲜司机
    pub async fn fetch_nearby_drivers(
        &self,
        lat: f64,
        lng: f64,
    ) -> Result<Vec<PresenceRecord>, StoreError> {
        let config = &self.writer.config;
        let make_query = driver_query();
        let mut cells: Vec<String> = Vec::with_capacity(9);
        for cell_id in compute_all_cell_ids(lat, lng, config.cell_step_seconds) {
            if !cells.contains(&cell_id) {
                cells.push(cell_id);
            }
        }

        let mut records = Vec::new();
        for cell_id in &cells {
            for doc in self.writer.store.query(&make_query(cell_id.as_str())).await? {
                match serde_json::from_value::<PresenceRecord>(doc.data) {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!("Skipping undecodable presence {}: {}", doc.path, e),
                }
            }
        }
        Ok(fresh_drivers(&records, Utc::now(), config.presence_stale()))
    }
}

impl Drop for PresenceService {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(uid: &str, role: Role, last_seen: DateTime<Utc>) -> PresenceRecord {
        PresenceRecord {
            uid: uid.into(),
            role,
            lat: 0.5,
            lng: 0.5,
            cell_id: "cell".into(),
            active_ride_id: None,
            last_seen,
            expires_at: last_seen + Duration::hours(24),
            platform: "linux".into(),
            app: "ridecell".into(),
            updated_at: last_seen,
        }
    }

    #[test]
    fn test_fresh_drivers_discards_stale_and_clients() {
        let now = now_millis();
        let stale = Duration::seconds(240);
        let records = vec![
            record("d1", Role::Driver, now - Duration::seconds(10)),
            record("d2", Role::Driver, now - Duration::seconds(241)),
            record("c1", Role::Client, now),
        ];
        let fresh = fresh_drivers(&records, now, stale);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].uid, "d1");
    }

    #[test]
    fn test_fresh_drivers_boundary_is_strict() {
        let now = now_millis();
        let stale = Duration::seconds(240);
        let records = vec![record("d1", Role::Driver, now - stale)];
        assert!(fresh_drivers(&records, now, stale).is_empty());
    }

    #[test]
    fn test_fresh_drivers_dedupes_migrating_driver() {
        let now = now_millis();
        let mut old = record("d1", Role::Driver, now - Duration::seconds(60));
        old.cell_id = "old".into();
        let mut new = record("d1", Role::Driver, now - Duration::seconds(5));
        new.cell_id = "new".into();

        let fresh = fresh_drivers([&old, &new], now, Duration::seconds(240));
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].cell_id, "new");
    }

    #[test]
    fn test_aggregate_is_order_independent() {
        let now = now_millis();
        let stale = Duration::seconds(240);
        let a = record("d1", Role::Driver, now - Duration::seconds(1));
        let b = record("d2", Role::Driver, now - Duration::seconds(2));
        let forward = fresh_drivers([&a, &b], now, stale);
        let backward = fresh_drivers([&b, &a], now, stale);
        assert_eq!(forward.len(), backward.len());
        for driver in &forward {
            assert!(backward.contains(driver));
        }
    }
}
