/// 文档数据模型
/// 字段名与存储中的文档字段一致（camelCase，时间为毫秒时间戳）
mod history;
mod location;
mod presence;
mod request;

pub use history::{HistoryEntry, HistoryRole};
pub use location::LocationPoint;
pub use presence::{PresenceRecord, Role};
pub use request::{RequestRef, RequestStatus, RideRequest};
