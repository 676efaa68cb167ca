use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use shared::domain::{Drosse, RouteTable};
use thiserror::Error;
use url::Url;

use crate::routes::routes_from_config;

pub const CONFIG_PATH: &str = "UI";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Why a drosse's route table could not be fetched.
///
/// The registry treats every variant the same way; the distinction only
/// feeds logging.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigFetchError {
    #[error("drosse has no host to reach")]
    NoHost,
    #[error("invalid config url: {0}")]
    InvalidUrl(String),
    #[error("drosse unreachable: {0}")]
    Unreachable(String),
    #[error("config request timed out")]
    Timeout,
    #[error("config endpoint answered with status {0}")]
    Status(u16),
    #[error("malformed config document: {0}")]
    Malformed(String),
}

impl ConfigFetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigFetchError::NoHost | ConfigFetchError::InvalidUrl(_) => "unaddressable",
            ConfigFetchError::Unreachable(_) => "unreachable",
            ConfigFetchError::Timeout => "timeout",
            ConfigFetchError::Status(_) => "status",
            ConfigFetchError::Malformed(_) => "malformed",
        }
    }
}

pub fn config_url(drosse: &Drosse) -> Result<Url, ConfigFetchError> {
    let host = drosse.primary_host().ok_or(ConfigFetchError::NoHost)?;
    let raw = format!("{}://{}:{}/{CONFIG_PATH}", drosse.proto, host, drosse.port);
    Url::parse(&raw).map_err(|err| ConfigFetchError::InvalidUrl(format!("{raw}: {err}")))
}

#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    async fn fetch_routes(&self, drosse: &Drosse) -> Result<RouteTable, ConfigFetchError>;
}

/// Reads the route table straight from the drosse's own control endpoint.
pub struct HttpConfigFetcher {
    http: Client,
    timeout: Duration,
}

impl HttpConfigFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            timeout,
        }
    }
}

impl Default for HttpConfigFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT)
    }
}

#[async_trait]
impl ConfigFetcher for HttpConfigFetcher {
    async fn fetch_routes(&self, drosse: &Drosse) -> Result<RouteTable, ConfigFetchError> {
        let url = config_url(drosse)?;
        let res = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ConfigFetchError::Timeout
                } else {
                    ConfigFetchError::Unreachable(err.to_string())
                }
            })?;

        let status = res.status();
        if !status.is_success() {
            return Err(ConfigFetchError::Status(status.as_u16()));
        }

        let document: Value = res
            .json()
            .await
            .map_err(|err| ConfigFetchError::Malformed(err.to_string()))?;
        routes_from_config(&document).map_err(|err| ConfigFetchError::Malformed(err.to_string()))
    }
}

#[cfg(test)]
#[path = "tests/config_fetch_tests.rs"]
mod tests;
