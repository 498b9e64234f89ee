//! Startup configuration for a server and its pipeline.
//!
//! Configuration is read once, before the server binds, from JSON:
//!
//! ```json
//! {
//!     "address": "127.0.0.1:8080",
//!     "max_request_size": 8388608,
//!     "log_requests": true,
//!     "cache": { "ttl_secs": 100, "honor_max_age": false }
//! }
//! ```
//!
//! Every field is optional except `cache.ttl_secs`. Omitting `cache` disables
//! response caching; a `ttl_secs` of `0` caches without expiry.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default request size cap (8 MiB), shared with the server.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Response cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Lifetime of each cached response in seconds; `0` never expires.
    pub ttl_secs: u64,
    /// Use a response's own `Cache-Control: max-age` instead of `ttl_secs` when present.
    #[serde(default)]
    pub honor_max_age: bool,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub address: String,
    pub max_request_size: usize,
    pub log_requests: bool,
    pub cache: Option<CacheConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_owned(),
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            log_requests: true,
            cache: None,
        }
    }
}

impl ServerConfig {
    /// Parse and validate configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed JSON or unknown fields,
    /// [`ConfigError::Invalid`] when [`validate`](Self::validate) fails.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("address must not be empty".to_owned()));
        }
        if self.max_request_size == 0 {
            return Err(ConfigError::Invalid(
                "max_request_size must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}
