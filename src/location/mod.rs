//! 位置来源
//!
//! 心跳与轨迹采样每次都通过回调读取最新位置，而不是捕获启动时的旧值。

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::models::LocationPoint;

#[async_trait]
pub trait LocationSource: Send + Sync {
    /// 当前位置；暂时无法定位时返回 None
    async fn current_location(&self) -> Option<LocationPoint>;
}

/// 手动设置的位置来源（网关调用方、测试、模拟器）
#[derive(Debug, Clone, Default)]
pub struct ManualLocation {
    current: Arc<RwLock<Option<LocationPoint>>>,
}

impl ManualLocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(lat: f64, lng: f64) -> Self {
        let source = Self::new();
        source.set(lat, lng);
        source
    }

    pub fn set(&self, lat: f64, lng: f64) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) =
            Some(LocationPoint::new(lat, lng));
    }

    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[async_trait]
impl LocationSource for ManualLocation {
    async fn current_location(&self) -> Option<LocationPoint> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
