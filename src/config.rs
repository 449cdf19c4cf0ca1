use std::env;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

pub const ENV_BASE_URL: &str = "LLM_CLIENT_BASE_URL";
pub const ENV_MAX_RETRIES: &str = "LLM_CLIENT_MAX_RETRIES";

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_MAX_RETRIES: u32 = 1;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);
const DEFAULT_USER_AGENT: &str = concat!("local-llm-client/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid backend url `{url}`: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid value for {name}: `{value}`")]
    InvalidValue { name: &'static str, value: String },
}

/// 客户端配置：显式构造后传给 `ApiClient`，不依赖全局状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: Url,
    /// 网络层失败后的额外重试次数（HTTP 错误状态不重试）
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base url is valid"),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            ..Self::default()
        })
    }

    /// 读取 `LLM_CLIENT_BASE_URL` 和 `LLM_CLIENT_MAX_RETRIES`，没设置就用默认值
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(url) = non_blank_var(ENV_BASE_URL) {
            config.base_url = parse_base_url(&url)?;
        }
        if let Some(raw) = non_blank_var(ENV_MAX_RETRIES) {
            config.max_retries = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: ENV_MAX_RETRIES,
                value: raw.clone(),
            })?;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ConfigError> {
        self.base_url = parse_base_url(base_url)?;
        Ok(self)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

fn non_blank_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidBaseUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw.trim()).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("url cannot be used as a base".to_string()));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("url must not carry a query or fragment".to_string()));
    }
    Ok(url)
}
