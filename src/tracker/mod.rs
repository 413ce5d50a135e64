//! 司机位置采样
//!
//! 每 30 秒读一次位置，与最近 3 个样本的平均点比较，
//! 移动超过 3 米才写回请求文档，抑制 GPS 抖动并控制写入量。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::location::LocationSource;
use crate::models::{LocationPoint, RequestRef};
use crate::store::{DocumentStore, keys};
use crate::utils::calculate_distance;

/// 样本缓冲容量
pub const SAMPLE_CAPACITY: usize = 3;

/// 固定容量的先进先出样本缓冲
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    samples: VecDeque<LocationPoint>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(SAMPLE_CAPACITY),
        }
    }

    pub fn push(&mut self, sample: LocationPoint) {
        if self.samples.len() == SAMPLE_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &LocationPoint> {
        self.samples.iter()
    }

    /// 样本经纬度的算术平均
    pub fn mean(&self) -> Option<(f64, f64)> {
        if self.samples.is_empty() {
            return None;
        }
        let n = self.samples.len() as f64;
        let (lat, lng) = self
            .samples
            .iter()
            .fold((0.0, 0.0), |(lat, lng), p| (lat + p.lat, lng + p.lng));
        Some((lat / n, lng / n))
    }

    /// 缓冲为空时总是发布；否则距平均点超过阈值才发布
    pub fn should_publish(&self, current: &LocationPoint, min_move_meters: f64) -> bool {
        match self.mean() {
            None => true,
            Some((lat, lng)) => {
                calculate_distance(lat, lng, current.lat, current.lng) > min_move_meters
            }
        }
    }
}

#[derive(Default)]
struct TrackerState {
    buffer: SampleBuffer,
    active: Option<RequestRef>,
}

#[derive(Clone)]
struct Sampler {
    store: Arc<dyn DocumentStore>,
    location: Arc<dyn LocationSource>,
    min_move_meters: f64,
    state: Arc<Mutex<TrackerState>>,
}

impl Sampler {
    async fn sample(&self) -> bool {
        let Some(current) = self.location.current_location().await else {
            tracing::debug!("No location available for tracking sample");
            return false;
        };

        let target = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(active) = state.active.clone() else {
                return false;
            };
            let publish = state.buffer.should_publish(&current, self.min_move_meters);
            state.buffer.push(current.clone());
            publish.then_some(active)
        };
        let Some(reference) = target else {
            return false;
        };

        let now = Utc::now().timestamp_millis();
        let fields = json!({
            "driverLat": current.lat,
            "driverLng": current.lng,
            "driverLocationUpdatedAt": now,
            "updatedAt": now,
        });
        let path = keys::request_path(&reference.cell_id, &reference.request_id);
        match self.store.update(&path, fields).await {
            Ok(()) => {
                tracing::debug!("Published driver location to {}", path);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to publish driver location to {}: {}", path, e);
                false
            }
        }
    }
}

pub struct DriverLocationTracker {
    sampler: Sampler,
    interval: std::time::Duration,
    timer: Option<JoinHandle<()>>,
}

impl DriverLocationTracker {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        location: Arc<dyn LocationSource>,
        config: &Config,
    ) -> Self {
        Self {
            sampler: Sampler {
                store,
                location,
                min_move_meters: config.tracker_min_move_meters,
                state: Arc::new(Mutex::new(TrackerState::default())),
            },
            interval: config.tracker_interval(),
            timer: None,
        }
    }

    /// 停止旧的跟踪、清空缓冲，立即采样一次后按周期采样
    pub fn start_tracking(&mut self, cell_id: impl Into<String>, request_id: impl Into<String>) {
        self.stop_tracking();
        let reference = RequestRef::new(cell_id, request_id);
        tracing::debug!("Start tracking driver location for {}", reference);
        {
            let mut state = self.lock_state();
            state.buffer.clear();
            state.active = Some(reference);
        }

        let sampler = self.sampler.clone();
        let period = self.interval;
        self.timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sampler.sample().await;
            }
        }));
    }

    /// 采样一次，返回是否写回了位置
    pub async fn sample_location(&self) -> bool {
        self.sampler.sample().await
    }

    pub fn should_publish(&self, current: &LocationPoint) -> bool {
        self.lock_state()
            .buffer
            .should_publish(current, self.sampler.min_move_meters)
    }

    pub fn stop_tracking(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        let mut state = self.lock_state();
        state.buffer.clear();
        state.active = None;
    }

    pub fn is_tracking(&self) -> bool {
        self.lock_state().active.is_some()
    }

    pub fn active_request(&self) -> Option<RequestRef> {
        self.lock_state().active.clone()
    }

    pub fn buffer(&self) -> SampleBuffer {
        self.lock_state().buffer.clone()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.sampler
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DriverLocationTracker {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
