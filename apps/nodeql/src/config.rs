//! # Application Configuration
//!
//! Settings come from an optional TOML file, then `NODEQL_*` environment
//! variables override individual keys.
//!
//! | Variable                 | Key                        |
//! |--------------------------|----------------------------|
//! | `NODEQL_ADDRESS`         | `address`                  |
//! | `NODEQL_API_TOKEN`       | `api_token`                |
//! | `NODEQL_DEFAULT_BRANCH`  | `default_branch`           |
//! | `NODEQL_PAGINATION_SIZE` | `pagination_size`          |
//! | `NODEQL_TIMEOUT`         | `timeout_secs`             |
//! | `NODEQL_MAX_CONCURRENT`  | `max_concurrent_execution` |

use crate::error::AppError;
use nodeql_core::ClientConfig;
use nodeql_core::primitives::{
    DEFAULT_BRANCH, DEFAULT_MAX_CONCURRENT_EXECUTION, DEFAULT_PAGINATION_SIZE,
    DEFAULT_RELATIONSHIP_DEPTH,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server used when neither the file nor the environment names one.
pub const DEFAULT_ADDRESS: &str = "http://localhost:8000";

/// Seconds before an HTTP request is abandoned.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub address: String,
    pub api_token: Option<String>,
    pub default_branch: String,
    pub pagination_size: usize,
    pub default_depth: usize,
    /// Operations a batch keeps in flight at once.
    pub max_concurrent_execution: usize,
    pub timeout_secs: u64,
    /// Log every query text at `info` before sending it.
    pub echo_graphql_queries: bool,
    /// Send the operation tracker as the `X-Nodeql-Tracker` header.
    pub insert_tracker: bool,
    /// When set, every request/response pair is written below this directory.
    pub recorder_directory: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            api_token: None,
            default_branch: DEFAULT_BRANCH.to_string(),
            pagination_size: DEFAULT_PAGINATION_SIZE,
            default_depth: DEFAULT_RELATIONSHIP_DEPTH,
            max_concurrent_execution: DEFAULT_MAX_CONCURRENT_EXECUTION,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            echo_graphql_queries: false,
            insert_tracker: false,
            recorder_directory: None,
        }
    }
}

impl AppConfig {
    /// Load `path` (defaults when `None`) and apply the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let config = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.with_env(|name| std::env::var(name).ok())
    }

    pub fn from_toml(raw: &str) -> Result<Self, AppError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply overrides read through `lookup`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        if let Some(address) = lookup("NODEQL_ADDRESS") {
            self.address = address;
        }
        if let Some(token) = lookup("NODEQL_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(branch) = lookup("NODEQL_DEFAULT_BRANCH") {
            self.default_branch = branch;
        }
        if let Some(size) = lookup("NODEQL_PAGINATION_SIZE") {
            self.pagination_size = parse_number("NODEQL_PAGINATION_SIZE", &size)?;
        }
        if let Some(timeout) = lookup("NODEQL_TIMEOUT") {
            self.timeout_secs = parse_number("NODEQL_TIMEOUT", &timeout)?;
        }
        if let Some(limit) = lookup("NODEQL_MAX_CONCURRENT") {
            self.max_concurrent_execution = parse_number("NODEQL_MAX_CONCURRENT", &limit)?;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.pagination_size == 0 {
            return Err(AppError::Config("pagination_size must be at least 1".into()));
        }
        if self.max_concurrent_execution == 0 {
            return Err(AppError::Config(
                "max_concurrent_execution must be at least 1".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(AppError::Config("timeout_secs must be at least 1".into()));
        }
        if !self.address.starts_with("http://") && !self.address.starts_with("https://") {
            return Err(AppError::Config(format!(
                "address '{}' must start with http:// or https://",
                self.address
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Settings handed to the core client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            default_branch: self.default_branch.clone(),
            pagination_size: self.pagination_size,
            default_depth: self.default_depth,
            max_concurrent_execution: self.max_concurrent_execution,
        }
    }
}

fn parse_number<N: std::str::FromStr>(name: &str, raw: &str) -> Result<N, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{name} must be a positive integer, got '{raw}'")))
}
