// Scan configuration: JSON file values, overridden by CLI flags

use gridwalk_scanner::fetch::{DEFAULT_TIMEOUT, DEFAULT_USER_AGENTS, FetchOptions};
use gridwalk_scanner::frontier::UrlFilter;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Maximum pages recorded. `None` crawls until the frontier drains.
    pub page_budget: Option<usize>,
    pub concurrency: usize,
    /// Delay between consecutive requests of one worker.
    pub rate_limit_ms: u64,
    pub timeout_secs: u64,
    pub retries: u32,
    pub follow_redirects: bool,
    pub record_cross_authority_redirects: bool,
    pub user_agents: Vec<String>,
    /// Path prefixes that are never queued.
    pub exclude_paths: Vec<String>,
    pub deadline_secs: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_budget: Some(200),
            concurrency: 4,
            rate_limit_ms: 500,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            retries: 0,
            follow_redirects: true,
            record_cross_authority_redirects: false,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            exclude_paths: Vec::new(),
            deadline_secs: None,
        }
    }
}

impl ScanConfig {
    /// Loads a JSON config. Missing keys take their defaults; `~` is expanded.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let expanded = shellexpand::tilde(path);
        let content = std::fs::read_to_string(Path::new(expanded.as_ref())).map_err(|source| {
            ConfigError::Io {
                path: path.to_string(),
                source,
            }
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.user_agents.iter().all(|ua| ua.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "user_agents must contain at least one entry".to_string(),
            ));
        }
        if let Some(prefix) = self.exclude_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::Invalid(format!(
                "exclude path '{}' must start with '/'",
                prefix
            )));
        }
        Ok(())
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            user_agents: self
                .user_agents
                .iter()
                .filter(|ua| !ua.trim().is_empty())
                .cloned()
                .collect(),
            follow_redirects: self.follow_redirects,
        }
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// Admission hook rejecting the configured path prefixes, if any.
    pub fn url_filter(&self) -> Option<UrlFilter> {
        if self.exclude_paths.is_empty() {
            return None;
        }
        let prefixes = self.exclude_paths.clone();
        Some(Arc::new(move |url: &Url| {
            !prefixes.iter().any(|prefix| url.path().starts_with(prefix.as_str()))
        }))
    }
}
