/// 地理网格模块
/// 经纬度 → 规范网格字符串 → 分片ID，以及8邻域计算
///
/// 规范字符串格式：`<N|S>DD_MM_SS_<E|W>DDD_MM_SS_sSS`，
/// 分片ID为规范字符串UTF-8字节的URL安全、无填充base64编码。
/// 所有客户端实现必须逐字节一致。
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;


/// 默认网格步长（角秒）
pub const DEFAULT_STEP_SECONDS: u32 = 30;

/// 纬度上限（角秒）
const LAT_MAX_SECONDS: i64 = 90 * 3600;

/// 经度上限（角秒）
const LON_MAX_SECONDS: i64 = 180 * 3600;

/// 邻格偏移顺序，(纬度, 经度)，以步长为单位。顺序属于跨平台约定。
const NEIGHBOR_DELTAS: [(i64, i64); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// 单轴上的网格原点：对齐到步长的角秒数 + 半球字母
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AxisOrigin {
    seconds: i64,
    hemisphere: char,
}

impl AxisOrigin {
    fn latitude(lat: f64, step: i64) -> Self {
        Self {
            seconds: bucket(lat, step),
            hemisphere: if lat < 0.0 { 'S' } else { 'N' },
        }
    }

    fn longitude(lng: f64, step: i64) -> Self {
        Self {
            seconds: bucket(lng, step),
            hemisphere: if lng < 0.0 { 'W' } else { 'E' },
        }
    }

    /// 偏移后越过赤道/本初子午线时取绝对值并翻转半球，到达上限时钳到 max-1
    fn shifted(self, delta: i64, max: i64) -> Self {
        let mut seconds = self.seconds.saturating_add(delta);
        let mut hemisphere = self.hemisphere;
        if seconds < 0 {
            seconds = -seconds;
            hemisphere = flip(hemisphere);
        }
        if seconds >= max {
            seconds = max - 1;
        }
        Self {
            seconds,
            hemisphere,
        }
    }
}

fn flip(hemisphere: char) -> char {
    match hemisphere {
        'N' => 'S',
        'S' => 'N',
        'E' => 'W',
        _ => 'E',
    }
}

/// 截断到整数角秒（取下界），再向下对齐到步长
fn bucket(value: f64, step: i64) -> i64 {
    let seconds = (value.abs() * 3600.0).floor() as i64;
    seconds - seconds % step
}

fn checked_step(step_seconds: u32) -> i64 {
    assert!(step_seconds > 0, "step_seconds must be positive");
    i64::from(step_seconds)
}

fn format_canonical(lat: AxisOrigin, lng: AxisOrigin, step_seconds: u32) -> String {
    format!(
        "{}{:02}_{:02}_{:02}_{}{:03}_{:02}_{:02}_s{:02}",
        lat.hemisphere,
        lat.seconds / 3600,
        (lat.seconds % 3600) / 60,
        lat.seconds % 60,
        lng.hemisphere,
        lng.seconds / 3600,
        (lng.seconds % 3600) / 60,
        lng.seconds % 60,
        step_seconds
    )
}

/// 计算坐标所在网格的规范字符串
///
/// # Panics
///
/// `step_seconds` 为 0 时 panic。
pub fn compute_canonical(lat: f64, lng: f64, step_seconds: u32) -> String {
    let step = checked_step(step_seconds);
    format_canonical(
        AxisOrigin::latitude(lat, step),
        AxisOrigin::longitude(lng, step),
        step_seconds,
    )
}

/// 规范字符串 → 分片ID
pub fn compute_cell_id(canonical: &str) -> String {
    URL_SAFE_NO_PAD.encode(canonical.as_bytes())
}

/// 8个邻格的规范字符串，按固定偏移顺序
pub fn compute_neighbor_canonicals(lat: f64, lng: f64, step_seconds: u32) -> Vec<String> {
    let step = checked_step(step_seconds);
    let lat_origin = AxisOrigin::latitude(lat, step);
    let lng_origin = AxisOrigin::longitude(lng, step);

    NEIGHBOR_DELTAS
        .iter()
        .map(|&(d_lat, d_lng)| {
            format_canonical(
                lat_origin.shifted(d_lat * step, LAT_MAX_SECONDS),
                lng_origin.shifted(d_lng * step, LON_MAX_SECONDS),
                step_seconds,
            )
        })
        .collect()
}

/// 自身 + 8邻格，共9项
pub fn compute_all_canonicals(lat: f64, lng: f64, step_seconds: u32) -> Vec<String> {
    let mut all = Vec::with_capacity(9);
    all.push(compute_canonical(lat, lng, step_seconds));
    all.extend(compute_neighbor_canonicals(lat, lng, step_seconds));
    all
}

pub fn compute_all_cell_ids(lat: f64, lng: f64, step_seconds: u32) -> Vec<String> {
    compute_all_canonicals(lat, lng, step_seconds)
        .iter()
        .map(|canonical| compute_cell_id(canonical))
        .collect()
}

/// 分片ID反解为规范字符串；不是合法网格ID时返回 None
pub fn decode_cell_id(cell_id: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(cell_id).ok()?;
    let canonical = String::from_utf8(bytes).ok()?;
    is_canonical(&canonical).then_some(canonical)
}

/// 校验 `[NS]\d{2}_\d{2}_\d{2}_[EW]\d{3}_\d{2}_\d{2}_s\d{2}`
pub fn is_canonical(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    if bytes.len() != 24 {
        return false;
    }
    let digits = |range: std::ops::Range<usize>| bytes[range].iter().all(u8::is_ascii_digit);

    matches!(bytes[0], b'N' | b'S')
        && digits(1..3)
        && bytes[3] == b'_'
        && digits(4..6)
        && bytes[6] == b'_'
        && digits(7..9)
        && bytes[9] == b'_'
        && matches!(bytes[10], b'E' | b'W')
        && digits(11..14)
        && bytes[14] == b'_'
        && digits(15..17)
        && bytes[17] == b'_'
        && digits(18..20)
        && bytes[20] == b'_'
        && bytes[21] == b's'
        && digits(22..24)
}

/// 网格值：规范字符串与分片ID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeoCell {
    pub canonical: String,
    pub id: String,
}

impl GeoCell {
    pub fn at(lat: f64, lng: f64, step_seconds: u32) -> Self {
        Self::from_canonical(compute_canonical(lat, lng, step_seconds))
    }

    pub fn from_canonical(canonical: String) -> Self {
        let id = compute_cell_id(&canonical);
        Self { canonical, id }
    }

    /// 自身 + 8邻格
    pub fn neighborhood(lat: f64, lng: f64, step_seconds: u32) -> Vec<Self> {
        compute_all_canonicals(lat, lng, step_seconds)
            .into_iter()
            .map(Self::from_canonical)
            .collect()
    }
}
