//! 用户资料查询（外部服务），仅用于获取显示名称

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ProfileError;

/// 乘客默认显示名
pub const DEFAULT_CLIENT_NAME: &str = "Pasajero";

/// 司机默认显示名
pub const DEFAULT_DRIVER_NAME: &str = "Conductor";

/// 资料服务请求超时
const PROFILE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn display_name(&self, uid: &str) -> Result<Option<String>, ProfileError>;
}

/// 尽力获取显示名，失败或为空时使用默认值
pub async fn resolve_display_name(
    profiles: &dyn ProfileLookup,
    uid: &str,
    fallback: &str,
) -> String {
    match profiles.display_name(uid).await {
        Ok(Some(name)) if !name.trim().is_empty() => name,
        Ok(_) => fallback.to_string(),
        Err(e) => {
            tracing::warn!("Failed to resolve display name for {}: {}", uid, e);
            fallback.to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    display_name: Option<String>,
    name: Option<String>,
}

/// 通过 HTTP 查询资料服务：`GET {base}/users/{uid}`
#[derive(Debug, Clone)]
pub struct HttpProfileLookup {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProfileLookup {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProfileError> {
        let client = reqwest::Client::builder()
            .timeout(PROFILE_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ProfileLookup for HttpProfileLookup {
    async fn display_name(&self, uid: &str) -> Result<Option<String>, ProfileError> {
        let url = format!("{}/users/{}", self.base_url, uid);
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let profile: ProfileResponse = response.error_for_status()?.json().await?;
        Ok(profile.display_name.or(profile.name))
    }
}

/// 固定的显示名表；未配置资料服务时使用空表
#[derive(Debug, Clone, Default)]
pub struct StaticProfiles {
    names: HashMap<String, String>,
}

impl StaticProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, uid: impl Into<String>, name: impl Into<String>) -> Self {
        self.names.insert(uid.into(), name.into());
        self
    }
}

#[async_trait]
impl ProfileLookup for StaticProfiles {
    async fn display_name(&self, uid: &str) -> Result<Option<String>, ProfileError> {
        Ok(self.names.get(uid).cloned())
    }
}
