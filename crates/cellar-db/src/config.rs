//! # Configuration
//!
//! Layered configuration for services embedding the stock core.
//!
//! ## Load Order (later overrides earlier)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Defaults            CellarConfig::default()                         │
//! │  2. Config file         cellar.toml (if present)                        │
//! │  3. Environment         CELLAR_DB_PATH, CELLAR_DB_MAX_CONNECTIONS,      │
//! │                         CELLAR_DB_BUSY_TIMEOUT_MS,                      │
//! │                         CELLAR_LOW_STOCK_THRESHOLD                      │
//! │  4. validate()                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example File
//! ```toml
//! [database]
//! path = "/var/lib/cellar/stock.db"
//! max_connections = 8
//! busy_timeout_ms = 2000
//!
//! [stock]
//! low_stock_threshold = 12
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cellar_core::DEFAULT_LOW_STOCK_THRESHOLD;

use crate::error::{DbError, DbResult};
use crate::pool::DbConfig;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "cellar.toml";

// =============================================================================
// Sections
// =============================================================================

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("cellar.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
            run_migrations: true,
        }
    }
}

/// `[stock]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSettings {
    /// Rows with `available <= threshold` show up in the low-stock report.
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: i64,
}

fn default_low_stock_threshold() -> i64 {
    DEFAULT_LOW_STOCK_THRESHOLD
}

impl Default for StockSettings {
    fn default() -> Self {
        Self {
            low_stock_threshold: default_low_stock_threshold(),
        }
    }
}

// =============================================================================
// Root Config
// =============================================================================

/// Full configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellarConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub stock: StockSettings,
}

impl CellarConfig {
    /// Loads configuration from file, environment, and defaults.
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if path.exists() {
            info!(?path, "Loading cellar config from file");
            Self::from_file(&path)?
        } else {
            debug!(?path, "Config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load cellar config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses a TOML file.
    pub fn from_file(path: &Path) -> DbResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DbError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    /// Parses TOML text.
    pub fn from_toml(contents: &str) -> DbResult<Self> {
        toml::from_str(contents).map_err(|e| DbError::Config(e.to_string()))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DbResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(DbError::Config("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(DbError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.stock.low_stock_threshold < 0 {
            return Err(DbError::Config(
                "stock.low_stock_threshold must not be negative".into(),
            ));
        }

        Ok(())
    }

    /// Pool configuration derived from the `[database]` section.
    pub fn to_db_config(&self) -> DbConfig {
        DbConfig::new(self.database.path.clone())
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
            .run_migrations(self.database.run_migrations)
    }

    /// Applies environment variable overrides.
    ///
    /// Takes a lookup function so tests do not have to mutate the process
    /// environment.
    fn apply_env_overrides<F>(&mut self, lookup: F) -> DbResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("CELLAR_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(max) = lookup("CELLAR_DB_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("CELLAR_DB_MAX_CONNECTIONS", &max)?;
        }

        if let Some(ms) = lookup("CELLAR_DB_BUSY_TIMEOUT_MS") {
            self.database.busy_timeout_ms = parse_env("CELLAR_DB_BUSY_TIMEOUT_MS", &ms)?;
        }

        if let Some(threshold) = lookup("CELLAR_LOW_STOCK_THRESHOLD") {
            self.stock.low_stock_threshold = parse_env("CELLAR_LOW_STOCK_THRESHOLD", &threshold)?;
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> DbResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DbError::Config(format!("{key} has invalid value '{value}'")))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CellarConfig::default();
        assert_eq!(config.database.path, PathBuf::from("cellar.db"));
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.stock.low_stock_threshold, DEFAULT_LOW_STOCK_THRESHOLD);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CellarConfig::from_toml(
            r#"
            [stock]
            low_stock_threshold = 12
            "#,
        )
        .unwrap();

        assert_eq!(config.stock.low_stock_threshold, 12);
        assert_eq!(config.database.busy_timeout_ms, 5_000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CELLAR_DB_PATH", "/tmp/override.db"),
            ("CELLAR_DB_MAX_CONNECTIONS", "9"),
        ]
        .into_iter()
        .collect();

        let mut config = CellarConfig::default();
        config
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/tmp/override.db"));
        assert_eq!(config.to_db_config().max_connections, 9);
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let mut config = CellarConfig::default();
        let err = config
            .apply_env_overrides(|key| {
                (key == "CELLAR_LOW_STOCK_THRESHOLD").then(|| "lots".to_string())
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_connections() {
        let mut config = CellarConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }
}
