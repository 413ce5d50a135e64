use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 参与者角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Driver,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Driver => "driver",
            Role::Client => "client",
        }
    }
}

/// 在线状态记录，存于 `cells/{cellId}/presence/{uid}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub uid: String,
    pub role: Role,
    pub lat: f64,
    pub lng: f64,
    pub cell_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_ride_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    pub platform: String,
    pub app: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl PresenceRecord {
    /// lastSeen 晚于 now - stale 才算新鲜
    pub fn is_fresh_at(&self, now: DateTime<Utc>, stale: Duration) -> bool {
        self.last_seen > now - stale
    }
}
