//! Runtime configuration for the core crate.
//!
//! # Responsibility
//! - Hold the knobs shared by sessions, stores and the cache backend.
//! - Reject obviously broken values before any store is opened.
//!
//! # Invariants
//! - `uri_base` never ends with `/`; object URIs are built by appending
//!   `/users/<id>/items/<KEY>` or `/groups/<id>/items/<KEY>`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_URI_BASE: &str = "http://bibstore.local";
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Core settings shared by every request-scoped session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Base used to build and resolve object URIs in relations.
    pub uri_base: String,
    /// Cache entry lifetime in seconds. `0` disables expiry.
    pub cache_ttl_secs: u64,
    /// Maximum number of entries kept by the in-process cache backend.
    pub cache_capacity: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            uri_base: DEFAULT_URI_BASE.to_string(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CoreConfig {
    /// Returns a copy with `uri_base` replaced (trailing `/` stripped).
    pub fn with_uri_base(mut self, uri_base: impl Into<String>) -> Self {
        self.uri_base = uri_base.into().trim().trim_end_matches('/').to_string();
        self
    }

    /// Cache TTL applied to entries written by stores.
    pub fn cache_ttl(&self) -> Option<Duration> {
        if self.cache_ttl_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.cache_ttl_secs))
        }
    }

    /// Checks that the configuration can be used to open stores.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.uri_base.trim();
        if base.is_empty() {
            return Err(ConfigError::InvalidUriBase(self.uri_base.clone()));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) || base.ends_with('/') {
            return Err(ConfigError::InvalidUriBase(self.uri_base.clone()));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::InvalidCacheCapacity);
        }
        Ok(())
    }
}

/// Logging settings consumed by [`crate::logging::init_logging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// One of `trace|debug|info|warn|error` (case-insensitive).
    pub level: String,
    /// Absolute directory for rolling log files.
    pub dir: PathBuf,
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            level: level.into(),
            dir: dir.into(),
        }
    }
}

/// Returns the default log level for current build mode.
///
/// - `debug` builds -> `debug`
/// - `release` builds -> `info`
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidUriBase(String),
    InvalidCacheCapacity,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUriBase(value) => {
                write!(f, "uri_base must be an http(s) URL without trailing slash, got `{value}`")
            }
            Self::InvalidCacheCapacity => write!(f, "cache_capacity must be greater than zero"),
        }
    }
}

impl Error for ConfigError {}
