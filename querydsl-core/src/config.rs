// Engine configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the hybrid executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on a single backend call. `None` waits indefinitely.
    pub statement_timeout: Option<Duration>,
    /// Abort a query when the backend returns more rows than this, before any in-process work.
    pub max_fetch_rows: Option<usize>,
    /// Include bound parameter values in debug logs.
    pub log_parameters: bool,
    /// Check that a function's declared dependency fields are present before calling it.
    pub strict_dependencies: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            statement_timeout: Some(Duration::from_secs(30)),
            max_fetch_rows: None,
            log_parameters: false,
            strict_dependencies: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("cannot read '{}': {}", path, e)))?;
        Self::from_str(&content)
    }

    /// Load configuration from a JSON, TOML or YAML document
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        if let Ok(config) = serde_json::from_str::<EngineConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = toml::from_str::<EngineConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = serde_yaml::from_str::<EngineConfig>(content) {
            return Ok(config);
        }

        Err(Error::Configuration("Unknown format".to_string()))
    }

    /// Defaults overridden by `QUERYDSL_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(ms) = std::env::var("QUERYDSL_STATEMENT_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                config.statement_timeout = if ms == 0 { None } else { Some(Duration::from_millis(ms)) };
            }
        }

        if let Ok(rows) = std::env::var("QUERYDSL_MAX_FETCH_ROWS") {
            if let Ok(rows) = rows.parse::<usize>() {
                config.max_fetch_rows = Some(rows);
            }
        }

        if let Ok(flag) = std::env::var("QUERYDSL_LOG_PARAMETERS") {
            config.log_parameters = matches!(flag.as_str(), "1" | "true" | "yes");
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.statement_timeout == Some(Duration::ZERO) {
            return Err(Error::Configuration(
                "statement_timeout must be greater than zero".to_string(),
            ));
        }

        if self.max_fetch_rows == Some(0) {
            return Err(Error::Configuration(
                "max_fetch_rows must be greater than zero when set".to_string(),
            ));
        }

        Ok(())
    }
}
