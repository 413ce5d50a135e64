use serde::Deserialize;

use crate::models::{LocationPoint, RequestRef};

#[derive(Debug, Deserialize)]
pub struct CreateRideRequest {
    pub pickup: LocationPoint,
    pub dropoff: Option<LocationPoint>,
}

#[derive(Debug, Deserialize)]
pub struct DriverLocationRequest {
    #[serde(flatten)]
    pub request: RequestRef,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
pub struct OpenRequestsQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub include_neighbors: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub latitude: f64,
    pub longitude: f64,
    /// 缺省使用配置的扩展延时
    pub expand_delay_secs: Option<u64>,
}
