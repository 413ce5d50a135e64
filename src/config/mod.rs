use std::env;
use std::time::Duration;

use crate::geocell::DEFAULT_STEP_SECONDS;

/// 文档存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub redis_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub profile_service_url: Option<String>,
    pub cell_step_seconds: u32,
    pub presence_heartbeat_secs: u64,
    pub presence_stale_secs: u64,
    pub record_ttl_hours: u64,
    pub request_stale_secs: u64,
    pub request_expand_delay_secs: u64,
    pub tracker_interval_secs: u64,
    pub tracker_min_move_meters: f64,
    pub client_platform: String,
    pub client_app: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            server_host: "::".to_string(),
            server_port: 3000,
            api_base_uri: "/api".to_string(),
            profile_service_url: None,
            cell_step_seconds: DEFAULT_STEP_SECONDS,
            presence_heartbeat_secs: 180,
            presence_stale_secs: 240,
            record_ttl_hours: 24,
            request_stale_secs: 180,
            request_expand_delay_secs: 20,
            tracker_interval_secs: 30,
            tracker_min_move_meters: 3.0,
            client_platform: env::consts::OS.to_string(),
            client_app: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(#[from] env::VarError),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let defaults = Config::default();

        let store_backend = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "redis".into())
            .to_lowercase()
            .as_str()
        {
            "redis" => StoreBackend::Redis,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    key: "STORE_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        // redis 后端必须显式配置地址
        let redis_url = match store_backend {
            StoreBackend::Redis => env::var("REDIS_URL")?,
            StoreBackend::Memory => env::var("REDIS_URL").unwrap_or(defaults.redis_url),
        };

        let cell_step_seconds = parse_or("CELL_STEP_SECONDS", defaults.cell_step_seconds);
        if cell_step_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "CELL_STEP_SECONDS",
                value: "0".to_string(),
            });
        }

        Ok(Config {
            store_backend,
            redis_url,
            server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: parse_or("SERVER_PORT", defaults.server_port),
            api_base_uri: env::var("API_BASE_URI").unwrap_or(defaults.api_base_uri),
            profile_service_url: env::var("PROFILE_SERVICE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            cell_step_seconds,
            presence_heartbeat_secs: parse_or(
                "PRESENCE_HEARTBEAT_SECS",
                defaults.presence_heartbeat_secs,
            ),
            presence_stale_secs: parse_or("PRESENCE_STALE_SECS", defaults.presence_stale_secs),
            record_ttl_hours: env::var("RECORD_TTL_HOURS")
                .ok()
                .and_then(|v| v.trim_end_matches('h').parse::<u64>().ok())
                .unwrap_or(defaults.record_ttl_hours),
            request_stale_secs: parse_or("REQUEST_STALE_SECS", defaults.request_stale_secs),
            request_expand_delay_secs: parse_or(
                "REQUEST_EXPAND_DELAY_SECS",
                defaults.request_expand_delay_secs,
            ),
            tracker_interval_secs: parse_or(
                "TRACKER_INTERVAL_SECS",
                defaults.tracker_interval_secs,
            ),
            tracker_min_move_meters: parse_or(
                "TRACKER_MIN_MOVE_METERS",
                defaults.tracker_min_move_meters,
            ),
            client_platform: env::var("CLIENT_PLATFORM").unwrap_or(defaults.client_platform),
            client_app: env::var("CLIENT_APP").unwrap_or(defaults.client_app),
        })
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.presence_heartbeat_secs)
    }

    pub fn presence_stale(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.presence_stale_secs as i64)
    }

    pub fn record_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.record_ttl_hours as i64)
    }

    pub fn request_stale(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.request_stale_secs as i64)
    }

    pub fn expand_delay(&self) -> Duration {
        Duration::from_secs(self.request_expand_delay_secs)
    }

    pub fn tracker_interval(&self) -> Duration {
        Duration::from_secs(self.tracker_interval_secs)
    }
}
