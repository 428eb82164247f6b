//! Controller configuration
//!
//! Settings come from built-in defaults, then an optional YAML file, then
//! `FORMULA_*` environment variables, later sources winning.

use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{ControllerError, ErrorCode, Result};
use crate::params::ResolutionMode;

pub const ENV_LOG_LEVEL: &str = "FORMULA_LOG_LEVEL";
pub const ENV_WORKERS: &str = "FORMULA_WORKERS";
pub const ENV_ERROR_BACKOFF: &str = "FORMULA_ERROR_BACKOFF";
pub const ENV_RESPONSE_TIME_TIMEOUT: &str = "FORMULA_RESPONSE_TIME_TIMEOUT";
pub const ENV_MAX_CONFLICT_RETRIES: &str = "FORMULA_MAX_CONFLICT_RETRIES";
pub const ENV_STRICT_PARAMETERS: &str = "FORMULA_STRICT_PARAMETERS";

/// Upper bound for `workers`
pub const MAX_WORKERS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Requeue delay after a failed evaluation
    #[serde(with = "humantime_serde")]
    pub error_backoff: Duration,
    /// Upper bound for a single `responseTime` request
    #[serde(with = "humantime_serde")]
    pub response_time_timeout: Duration,
    /// Extra attempts after a conflicting status write
    pub max_conflict_retries: u32,
    /// Concurrent invocations across all resources
    pub workers: usize,
    /// Refuse to evaluate when any parameter fails to resolve
    pub strict_parameters: bool,
    #[serde(with = "humantime_serde")]
    pub failure_backoff_base: Duration,
    #[serde(with = "humantime_serde")]
    pub failure_backoff_max: Duration,
    pub log_level: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            error_backoff: Duration::from_secs(3),
            response_time_timeout: Duration::from_secs(10),
            max_conflict_retries: 3,
            workers: 4,
            strict_parameters: true,
            failure_backoff_base: Duration::from_secs(1),
            failure_backoff_max: Duration::from_secs(300),
            log_level: "info".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load from `path` (defaults when `None`), apply environment overrides
    /// and validate.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path).await?,
            None => Self::default(),
        };
        config.merge_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|err| {
            ControllerError::config_with_code(
                ErrorCode::CONFIG_NOT_FOUND,
                format!("cannot read {}", path.display()),
            )
            .with_source(err)
        })?;
        let config = Self::from_yaml(&content).map_err(|err| {
            ControllerError::config_with_code(
                ErrorCode::CONFIG_INVALID_YAML,
                format!("invalid configuration in {}", path.display()),
            )
            .with_source(err)
        })?;
        debug!(path = %path.display(), "Loaded controller configuration");
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Apply `FORMULA_*` overrides from the process environment
    pub fn merge_env_vars(&mut self) -> Result<()> {
        self.merge_env_from(|name| std::env::var(name).ok())
    }

    /// Apply `FORMULA_*` overrides from `lookup`
    pub fn merge_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(raw) = lookup(ENV_WORKERS) {
            self.workers = parse_env(ENV_WORKERS, &raw, |s| s.parse().ok())?;
        }
        if let Some(raw) = lookup(ENV_ERROR_BACKOFF) {
            self.error_backoff = parse_env(ENV_ERROR_BACKOFF, &raw, parse_human_duration)?;
        }
        if let Some(raw) = lookup(ENV_RESPONSE_TIME_TIMEOUT) {
            self.response_time_timeout =
                parse_env(ENV_RESPONSE_TIME_TIMEOUT, &raw, parse_human_duration)?;
        }
        if let Some(raw) = lookup(ENV_MAX_CONFLICT_RETRIES) {
            self.max_conflict_retries = parse_env(ENV_MAX_CONFLICT_RETRIES, &raw, |s| s.parse().ok())?;
        }
        if let Some(raw) = lookup(ENV_STRICT_PARAMETERS) {
            self.strict_parameters = parse_env(ENV_STRICT_PARAMETERS, &raw, |s| s.parse().ok())?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ControllerError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                "workers must be at least 1",
            ));
        }
        if self.workers > MAX_WORKERS {
            return Err(ControllerError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("workers must not exceed {}", MAX_WORKERS),
            ));
        }
        if self.response_time_timeout.is_zero() {
            return Err(ControllerError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                "response_time_timeout must be greater than zero",
            ));
        }
        if self.failure_backoff_base > self.failure_backoff_max {
            return Err(ControllerError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                "failure_backoff_base must not exceed failure_backoff_max",
            ));
        }
        Ok(())
    }

    pub fn resolution_mode(&self) -> ResolutionMode {
        if self.strict_parameters {
            ResolutionMode::Strict
        } else {
            ResolutionMode::Lenient
        }
    }
}

fn parse_human_duration(raw: &str) -> Option<Duration> {
    humantime::parse_duration(raw.trim()).ok()
}

fn parse_env<T>(name: &str, raw: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
    parse(raw.trim()).ok_or_else(|| {
        ControllerError::config_with_code(
            ErrorCode::CONFIG_INVALID_VALUE,
            format!("invalid value {:?} for {}", raw, name),
        )
    })
}
