//! Runtime configuration for the relay
//!
//! The host application owns where these values come from; [`RelayConfig::from_env`]
//! covers the common case of `CRUDLOG_*` environment variables.

use crate::error::{RelayError, RelayResult};
use figment::{providers::Env, Figment};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How log records leave the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMethod {
    /// A quick, bounded HTTP request inside the triggering operation.
    /// Simpler, no worker needed, but adds a little latency.
    Sync,
    /// Push to the delivery queue for retrying background dispatch.
    #[default]
    Async,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Account API key for the remote logging service.
    pub api_key: Option<String>,
    /// Endpoint the tracking policy is fetched from.
    pub config_endpoint: Option<String>,
    /// Endpoint log records are posted to.
    #[serde(alias = "endpoint")]
    pub log_endpoint: Option<String>,
    pub dispatch_method: DispatchMethod,
    /// Seconds a fetched policy (or a failed-fetch placeholder) stays cached.
    pub policy_ttl_secs: u64,
    /// Timeout for the policy fetch, in seconds.
    pub config_timeout_secs: u64,
    /// Timeout for the synchronous dispatch path, in seconds.
    pub sync_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            config_endpoint: None,
            log_endpoint: None,
            dispatch_method: DispatchMethod::default(),
            policy_ttl_secs: 3600,
            config_timeout_secs: 5,
            sync_timeout_secs: 2,
        }
    }
}

impl RelayConfig {
    /// Load configuration from `CRUDLOG_*` environment variables
    /// (`CRUDLOG_API_KEY`, `CRUDLOG_CONFIG_ENDPOINT`, `CRUDLOG_ENDPOINT`,
    /// `CRUDLOG_DISPATCH_METHOD`).
    ///
    /// A missing key or endpoint is not an error here; the pipeline treats an
    /// unconfigured relay as disabled at the point of use.
    pub fn from_env() -> RelayResult<Self> {
        Figment::new()
            .merge(Env::prefixed("CRUDLOG_"))
            .extract()
            .map_err(|e| RelayError::Config(e.to_string()))
    }

    pub fn policy_ttl(&self) -> Duration {
        Duration::from_secs(self.policy_ttl_secs)
    }

    pub fn config_timeout(&self) -> Duration {
        Duration::from_secs(self.config_timeout_secs)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RelayConfig::default();
        assert!(config.api_key.is_none());
        assert!(config.log_endpoint.is_none());
        assert_eq!(config.dispatch_method, DispatchMethod::Async);
        assert_eq!(config.policy_ttl(), Duration::from_secs(3600));
        assert_eq!(config.config_timeout(), Duration::from_secs(5));
        assert_eq!(config.sync_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_dispatch_method_parsing() {
        let config: RelayConfig = serde_json::from_value(serde_json::json!({
            "api_key": "sk-test",
            "endpoint": "https://crudlog.test/api/v1/log/async",
            "dispatch_method": "sync",
        }))
        .unwrap();

        assert_eq!(config.dispatch_method, DispatchMethod::Sync);
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        // `endpoint` is the historical alias for `log_endpoint`.
        assert_eq!(
            config.log_endpoint.as_deref(),
            Some("https://crudlog.test/api/v1/log/async")
        );
    }
}
