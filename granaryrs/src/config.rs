//! Configuration system for Granary.
//!
//! Supports TOML-based configuration for query planning, the Druid client,
//! and pagination defaults.

use std::collections::BTreeMap;
use std::path::Path;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{GranaryError, Result};
use crate::query::QueryOptions;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GranaryConfig {
    /// Query planning settings.
    pub query: QueryConfig,

    /// Druid client settings.
    pub druid: DruidConfig,

    /// Pagination defaults.
    pub pagination: PaginationConfig,
}

/// Query planning configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Allow eligible requests to run as Druid topN (default: true).
    pub top_n_enabled: bool,
    /// Time zone bound when a request names none (default: "UTC").
    pub default_time_zone: String,
}

/// Druid client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DruidConfig {
    /// Broker endpoint queries are posted to.
    pub endpoint: String,
    /// Query timeout in milliseconds (default: 10000).
    pub timeout_ms: u64,
    /// Query priority passed through in the Druid context (default: 0).
    pub priority: i64,
}

/// Pagination configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Page size when the caller paginates without one (default: 25).
    pub default_per_page: u64,
    /// Largest page size honored (default: 10000).
    pub max_per_page: u64,
}

// Default implementations

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_n_enabled: true,
            default_time_zone: "UTC".to_string(),
        }
    }
}

impl Default for DruidConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8082/druid/v2".to_string(),
            timeout_ms: 10_000,
            priority: 0,
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_per_page: 25,
            max_per_page: 10_000,
        }
    }
}

impl GranaryConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load from default locations (env var, cwd, user config dir, or defaults).
    ///
    /// Search order:
    /// 1. `GRANARY_CONFIG` environment variable
    /// 2. `./granary.toml` (current directory)
    /// 3. `~/.config/granary/granary.toml` (user config dir)
    /// 4. Built-in defaults
    pub fn load_default() -> Self {
        // 1. Check environment variable for explicit path
        if let Ok(path) = std::env::var("GRANARY_CONFIG") {
            if let Ok(cfg) = Self::from_file(&path) {
                tracing::info!(path = %path, "loaded config from GRANARY_CONFIG");
                return cfg;
            }
        }

        // 2. Check current working directory
        if let Ok(cfg) = Self::from_file("granary.toml") {
            tracing::info!("loaded config from ./granary.toml");
            return cfg;
        }

        // 3. Check user config directory
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("granary").join("granary.toml");
            if let Ok(cfg) = Self::from_file(&user_config) {
                tracing::info!(path = %user_config.display(), "loaded config from user config dir");
                return cfg;
            }
        }

        // 4. Return defaults
        tracing::debug!("no config file found, using defaults");
        Self::default()
    }

    /// The configured default time zone, parsed.
    pub fn default_time_zone(&self) -> Result<Tz> {
        self.query.default_time_zone.parse::<Tz>().map_err(|_| {
            GranaryError::Binding(format!(
                "unknown time zone '{}' in configuration",
                self.query.default_time_zone
            ))
        })
    }

    /// Planning options for a [`QueryBuilder`](crate::query::QueryBuilder).
    /// The Druid timeout and priority ride along as query context.
    pub fn query_options(&self) -> QueryOptions {
        let mut query_context = BTreeMap::new();
        query_context.insert(
            "timeout".to_string(),
            serde_json::Value::from(self.druid.timeout_ms),
        );
        query_context.insert(
            "priority".to_string(),
            serde_json::Value::from(self.druid.priority),
        );
        QueryOptions {
            top_n_enabled: self.query.top_n_enabled,
            query_context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = GranaryConfig::default();
        assert!(cfg.query.top_n_enabled);
        assert_eq!(cfg.query.default_time_zone, "UTC");
        assert_eq!(cfg.druid.timeout_ms, 10_000);
        assert_eq!(cfg.pagination.default_per_page, 25);
        assert_eq!(cfg.default_time_zone().unwrap(), Tz::UTC);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[query]
top_n_enabled = false
default_time_zone = "America/New_York"

[druid]
timeout_ms = 60000
priority = 10
"#;
        let cfg = GranaryConfig::from_toml(toml).unwrap();
        assert!(!cfg.query.top_n_enabled);
        assert_eq!(cfg.default_time_zone().unwrap(), Tz::America__New_York);
        assert_eq!(cfg.druid.timeout_ms, 60_000);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.pagination.max_per_page, 10_000);
    }

    #[test]
    fn test_query_options_carry_druid_context() {
        let cfg = GranaryConfig::from_toml("[druid]\ntimeout_ms = 5000").unwrap();
        let options = cfg.query_options();
        assert!(options.top_n_enabled);
        assert_eq!(
            options.query_context.get("timeout"),
            Some(&serde_json::Value::from(5000u64))
        );
        assert_eq!(
            options.query_context.get("priority"),
            Some(&serde_json::Value::from(0i64))
        );
    }

    #[test]
    fn test_bad_time_zone_is_reported() {
        let cfg = GranaryConfig::from_toml("[query]\ndefault_time_zone = \"Mars/Olympus\"")
            .unwrap();
        assert!(cfg.default_time_zone().is_err());
    }
}
