use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::LocationPoint;

/// 行程请求状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Open,
    Assigned,
    Cancelled,
    Completed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Open => "open",
            RequestStatus::Assigned => "assigned",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Cancelled | RequestStatus::Completed)
    }

    /// open → assigned | cancelled，assigned → completed | cancelled
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Open, RequestStatus::Assigned)
                | (RequestStatus::Open, RequestStatus::Cancelled)
                | (RequestStatus::Assigned, RequestStatus::Completed)
                | (RequestStatus::Assigned, RequestStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 请求定位：所在分片 + 请求ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestRef {
    pub cell_id: String,
    pub request_id: String,
}

impl RequestRef {
    pub fn new(cell_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            cell_id: cell_id.into(),
            request_id: request_id.into(),
        }
    }
}

impl std::fmt::Display for RequestRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.cell_id, self.request_id)
    }
}

/// 行程请求，存于 `cells/{cellId}/requests/{requestId}`，
/// 分片由创建时的上车点决定，之后不再迁移
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRequest {
    pub request_id: String,
    pub created_by_uid: String,
    pub pickup: LocationPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropoff: Option<LocationPoint>,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_driver_uid: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    pub cell_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_lng: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub driver_location_updated_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_name: Option<String>,
}

impl RideRequest {
    pub fn reference(&self) -> RequestRef {
        RequestRef::new(self.cell_id.clone(), self.request_id.clone())
    }

    /// 读端判断：非 open 状态恒为新鲜；open 状态要求最近心跳（缺省用创建时间）在阈值内
    pub fn is_fresh_at(&self, now: DateTime<Utc>, stale: Duration) -> bool {
        if self.status != RequestStatus::Open {
            return true;
        }
        let last = self.last_heartbeat.unwrap_or(self.created_at);
        now - last < stale
    }

    pub fn is_fresh(&self, stale: Duration) -> bool {
        self.is_fresh_at(Utc::now(), stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_request(now: DateTime<Utc>) -> RideRequest {
        RideRequest {
            request_id: "r1".into(),
            created_by_uid: "rider".into(),
            pickup: LocationPoint::new(0.5, 0.5),
            dropoff: None,
            status: RequestStatus::Open,
            assigned_driver_uid: None,
            created_at: now - Duration::seconds(3600),
            updated_at: now,
            cell_id: "cell".into(),
            expires_at: now + Duration::hours(24),
            driver_lat: None,
            driver_lng: None,
            driver_location_updated_at: None,
            last_heartbeat: None,
            client_name: None,
            driver_name: None,
        }
    }

    #[test]
    fn test_open_request_freshness_threshold() {
        let now = Utc::now();
        let stale = Duration::seconds(180);
        let mut request = open_request(now);

        request.last_heartbeat = Some(now - Duration::seconds(181));
        assert!(!request.is_fresh_at(now, stale));

        request.last_heartbeat = Some(now - Duration::seconds(179));
        assert!(request.is_fresh_at(now, stale));
    }

    #[test]
    fn test_non_open_request_is_always_fresh() {
        let now = Utc::now();
        let mut request = open_request(now);
        request.status = RequestStatus::Assigned;
        request.last_heartbeat = Some(now - Duration::seconds(10_000));
        assert!(request.is_fresh_at(now, Duration::seconds(180)));
    }

    #[test]
    fn test_missing_heartbeat_falls_back_to_created_at() {
        let now = Utc::now();
        let mut request = open_request(now);
        assert!(!request.is_fresh_at(now, Duration::seconds(180)));

        request.created_at = now - Duration::seconds(10);
        assert!(request.is_fresh_at(now, Duration::seconds(180)));
    }

    #[test]
    fn test_terminal_states_have_no_transitions() {
        let all = [
            RequestStatus::Open,
            RequestStatus::Assigned,
            RequestStatus::Cancelled,
            RequestStatus::Completed,
        ];
        for next in all {
            assert!(!RequestStatus::Cancelled.can_transition_to(next));
            assert!(!RequestStatus::Completed.can_transition_to(next));
        }
        assert!(RequestStatus::Open.can_transition_to(RequestStatus::Assigned));
        assert!(!RequestStatus::Open.can_transition_to(RequestStatus::Completed));
    }

    #[test]
    fn test_document_field_names() {
        let now = Utc::now();
        let value = serde_json::to_value(open_request(now)).unwrap();
        assert_eq!(value["status"], "open");
        assert!(value.get("createdByUid").is_some());
        assert!(value.get("cellId").is_some());
        assert!(value["createdAt"].is_i64());
        assert!(value.get("dropoff").is_none());
    }
}
