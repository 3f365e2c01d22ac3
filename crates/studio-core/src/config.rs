use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{CoreError, CoreErrorKind, CoreResult};
use crate::orchestration::CancellationMode;
use crate::polling::{PollOptions, RetryOptions};

const SERVICE: &str = "config";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default = "AdapterTimingConfig::async_polling")]
    pub async_adapter: AdapterTimingConfig,

    #[serde(default = "AdapterTimingConfig::workflow_graph")]
    pub workflow_adapter: AdapterTimingConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            polling: PollingConfig::default(),
            retry: RetryConfig::default(),
            async_adapter: AdapterTimingConfig::async_polling(),
            workflow_adapter: AdapterTimingConfig::workflow_graph(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_http_timeout_ms() -> u64 {
    60_000
}

fn default_user_agent() -> String {
    format!("studio-core/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_http_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_poll_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_poll_timeout_ms() -> u64 {
    600_000
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_poll_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_exponential_backoff")]
    pub exponential_backoff: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_exponential_backoff() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            exponential_backoff: default_exponential_backoff(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterTimingConfig {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl AdapterTimingConfig {
    pub fn async_polling() -> Self {
        Self {
            poll_interval_ms: 5_000,
            max_attempts: 60,
        }
    }

    pub fn workflow_graph() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_attempts: 120,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub cancellation: CancellationMode,
}

impl CoreConfig {
    pub fn from_json_str(raw: &str) -> CoreResult<Self> {
        serde_json::from_str(raw).map_err(|error| {
            CoreError::new(CoreErrorKind::InvalidInput, format!("invalid core config: {error}"))
                .in_service(SERVICE, "from_json_str")
        })
    }

    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("failed to read config file: {error}"),
            )
            .in_service(SERVICE, "load")
            .with_context("path", path.display())
        })?;
        let mut config = Self::from_json_str(&raw)
            .map_err(|error| error.with_context("path", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = parse_override(&lookup, "STUDIO_HTTP_TIMEOUT_MS") {
            self.http.timeout_ms = value;
        }
        if let Some(value) = parse_override(&lookup, "STUDIO_POLL_INTERVAL_MS") {
            self.polling.poll_interval_ms = value;
        }
        if let Some(value) = parse_override(&lookup, "STUDIO_POLL_TIMEOUT_MS") {
            self.polling.timeout_ms = value;
        }
        if let Some(value) = parse_override(&lookup, "STUDIO_MAX_RETRIES") {
            self.retry.max_retries = value;
        }
        if let Some(value) = parse_override(&lookup, "STUDIO_RETRY_DELAY_MS") {
            self.retry.retry_delay_ms = value;
        }
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(component = "config", key, value = trimmed, "ignoring unparsable override");
            None
        }
    }
}

impl From<&PollingConfig> for PollOptions {
    fn from(config: &PollingConfig) -> Self {
        PollOptions::new(
            Duration::from_millis(config.poll_interval_ms),
            Duration::from_millis(config.timeout_ms),
        )
    }
}

impl From<&RetryConfig> for RetryOptions {
    fn from(config: &RetryConfig) -> Self {
        let options =
            RetryOptions::new(config.max_retries, Duration::from_millis(config.retry_delay_ms));
        if config.exponential_backoff {
            options
        } else {
            options.flat()
        }
    }
}
