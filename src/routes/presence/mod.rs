mod handler;
mod model;

pub use handler::{count_nearby_drivers, go_offline, heartbeat, nearby_drivers};
pub use model::{DriverCount, HeartbeatRequest, NearbyQuery, OfflineRequest};
