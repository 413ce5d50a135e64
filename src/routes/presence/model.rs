use serde::{Deserialize, Serialize};

use crate::models::Role;

/// 网关调用方每次心跳携带上次所在格，服务端不保存会话
#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub role: Role,
    pub latitude: f64,
    pub longitude: f64,
    pub active_ride_id: Option<String>,
    pub previous_cell_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OfflineRequest {
    pub role: Role,
    pub cell_id: String,
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Serialize)]
pub struct DriverCount {
    pub count: usize,
}
