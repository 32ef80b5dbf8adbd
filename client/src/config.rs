//! Configuration management for the client.

use std::env;
use std::time::Duration;

const DEFAULT_API_VERSION: &str = "1.1";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;

/// Client configuration, usually loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Application identifier sent with every request
    pub app_id: String,
    /// Application key sent with every request
    pub app_key: String,
    /// Base URL of the backend, without the API version
    pub server_url: String,
    /// API version path segment
    pub api_version: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Requests allowed on the wire at once
    pub max_concurrent_requests: usize,
}

impl Config {
    /// Configuration with default version, timeout and concurrency.
    pub fn new(
        app_id: impl Into<String>,
        app_key: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            app_key: app_key.into(),
            server_url: server_url.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Read a `.env` file if there is one, then load from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load configuration through `var`, which maps a variable name to its value.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let app_id = var("CIRRUS_APP_ID").ok_or(ConfigError::MissingAppId)?;
        let app_key = var("CIRRUS_APP_KEY").ok_or(ConfigError::MissingAppKey)?;
        let server_url = var("CIRRUS_SERVER_URL").ok_or(ConfigError::MissingServerUrl)?;

        let api_version =
            var("CIRRUS_API_VERSION").unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        let timeout = match var("CIRRUS_TIMEOUT_SECS") {
            Some(secs) => secs.parse().map_err(|_| ConfigError::InvalidTimeout)?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let max_concurrent_requests = match var("CIRRUS_MAX_CONCURRENT_REQUESTS") {
            Some(n) => match n.parse() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidMaxConcurrentRequests),
            },
            None => DEFAULT_MAX_CONCURRENT_REQUESTS,
        };

        Ok(Self {
            app_id,
            app_key,
            server_url: server_url.trim_end_matches('/').to_string(),
            api_version,
            timeout: Duration::from_secs(timeout),
            max_concurrent_requests,
        })
    }

    /// Full URL of `endpoint`.
    pub fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}/{}",
            self.server_url.trim_end_matches('/'),
            self.api_version,
            endpoint.trim_start_matches('/')
        )
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("CIRRUS_APP_ID environment variable is required")]
    MissingAppId,

    #[error("CIRRUS_APP_KEY environment variable is required")]
    MissingAppKey,

    #[error("CIRRUS_SERVER_URL environment variable is required")]
    MissingServerUrl,

    #[error("Invalid CIRRUS_TIMEOUT_SECS value")]
    InvalidTimeout,

    #[error("Invalid CIRRUS_MAX_CONCURRENT_REQUESTS value")]
    InvalidMaxConcurrentRequests,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("CIRRUS_APP_ID", "app"),
        ("CIRRUS_APP_KEY", "key"),
        ("CIRRUS_SERVER_URL", "https://api.example.com/"),
    ];

    #[test]
    fn defaults() {
        let config = Config::from_vars(vars(&REQUIRED)).unwrap();
        assert_eq!(config.app_id, "app");
        assert_eq!(config.api_version, "1.1");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.max_concurrent_requests, 4);
        assert_eq!(
            config.url("classes/Person"),
            "https://api.example.com/1.1/classes/Person"
        );
    }

    #[test]
    fn overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("CIRRUS_API_VERSION", "2"));
        pairs.push(("CIRRUS_TIMEOUT_SECS", "3"));
        pairs.push(("CIRRUS_MAX_CONCURRENT_REQUESTS", "16"));

        let config = Config::from_vars(vars(&pairs)).unwrap();
        assert_eq!(config.url("users"), "https://api.example.com/2/users");
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.max_concurrent_requests, 16);
    }

    #[test]
    fn missing_and_invalid_values() {
        assert_eq!(
            Config::from_vars(vars(&REQUIRED[1..])).unwrap_err(),
            ConfigError::MissingAppId
        );

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("CIRRUS_MAX_CONCURRENT_REQUESTS", "0"));
        assert_eq!(
            Config::from_vars(vars(&pairs)).unwrap_err(),
            ConfigError::InvalidMaxConcurrentRequests
        );

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("CIRRUS_TIMEOUT_SECS", "soon"));
        assert_eq!(
            Config::from_vars(vars(&pairs)).unwrap_err(),
            ConfigError::InvalidTimeout
        );
    }
}
