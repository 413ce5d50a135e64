/// 文档路径与 Redis 键
/// 路径布局：
/// - `cells/{cellId}/presence/{uid}`
/// - `cells/{cellId}/requests/{requestId}`
/// - `users/{uid}/history/{rideId}`

/// 在线状态集合组名
pub const PRESENCE_GROUP: &str = "presence";

/// 行程请求集合组名
pub const REQUESTS_GROUP: &str = "requests";

/// 行程历史集合组名
pub const HISTORY_GROUP: &str = "history";

/// Redis 文档键前缀
const DOCUMENT_PREFIX: &str = "doc:";

/// Redis 集合索引键前缀
const COLLECTION_INDEX_PREFIX: &str = "idx:col:";

/// Redis 集合组索引键前缀
const GROUP_INDEX_PREFIX: &str = "idx:group:";

/// Redis 变更通知频道前缀
const CHANGE_CHANNEL_PREFIX: &str = "chg:";

/// 分片内在线状态集合
pub fn presence_collection(cell_id: &str) -> String {
    format!("cells/{}/{}", cell_id, PRESENCE_GROUP)
}

pub fn presence_path(cell_id: &str, uid: &str) -> String {
    format!("{}/{}", presence_collection(cell_id), uid)
}

/// 分片内行程请求集合
pub fn requests_collection(cell_id: &str) -> String {
    format!("cells/{}/{}", cell_id, REQUESTS_GROUP)
}

pub fn request_path(cell_id: &str, request_id: &str) -> String {
    format!("{}/{}", requests_collection(cell_id), request_id)
}

pub fn history_path(uid: &str, ride_id: &str) -> String {
    format!("users/{}/{}/{}", uid, HISTORY_GROUP, ride_id)
}

/// 生成文档存储键
pub fn document_key(path: &str) -> String {
    format!("{}{}", DOCUMENT_PREFIX, path)
}

/// 生成集合索引键
pub fn collection_index_key(collection: &str) -> String {
    format!("{}{}", COLLECTION_INDEX_PREFIX, collection)
}

/// 生成集合组索引键
pub fn group_index_key(group: &str) -> String {
    format!("{}{}", GROUP_INDEX_PREFIX, group)
}

/// 生成集合变更频道
pub fn change_channel(collection: &str) -> String {
    format!("{}{}", CHANGE_CHANNEL_PREFIX, collection)
}

/// 集合组变更频道模式，例如 `chg:*/requests`
pub fn group_change_pattern(group: &str) -> String {
    format!("{}*/{}", CHANGE_CHANNEL_PREFIX, group)
}
