//! Configuration system for the jsonhouse server
//!
//! Loads configuration from:
//! 1. config.yaml - operational settings (listen address, logging, ingest)
//! 2. .env file - deployment overrides
//!
//! Environment variables always override config.yaml values.

use jsonhouse_ingest::IngestConfig;
use jsonhouse_registry::RefreshConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar { name: String, value: String },
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

/// Table registry refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub refresh_interval_secs: u64,
    pub force_reload_debounce_secs: u64,
    /// CREATE TABLE statements known at startup
    pub tables: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 15 * 60,
            force_reload_debounce_secs: 60,
            tables: Vec::new(),
        }
    }
}

impl RegistryConfig {
    pub fn refresh(&self) -> RefreshConfig {
        RefreshConfig {
            interval: Duration::from_secs(self.refresh_interval_secs.max(1)),
            force_debounce: Duration::from_secs(self.force_reload_debounce_secs),
        }
    }
}

/// Where virtual table manifests are kept
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory of manifest files; in memory when unset
    pub manifest_dir: Option<PathBuf>,
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub ingest: IngestConfig,
    pub registry: RegistryConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Config::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(host) = lookup("JSONHOUSE_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("JSONHOUSE_SERVER_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidEnvVar {
                name: "JSONHOUSE_SERVER_PORT".to_string(),
                value: port.clone(),
            })?;
        }
        if let Some(cluster) = lookup("JSONHOUSE_CLUSTER") {
            self.ingest.cluster_name = Some(cluster).filter(|c| !c.is_empty());
        }
        if let Some(dir) = lookup("JSONHOUSE_MANIFEST_DIR") {
            self.storage.manifest_dir = Some(PathBuf::from(dir));
        }

        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(output) = lookup("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.logging.directory = dir;
        }
        Ok(())
    }

    /// Set logging environment variables for the logging module
    pub fn apply_logging_env(&self) {
        std::env::set_var("RUST_LOG", &self.logging.level);
        std::env::set_var("LOG_FORMAT", &self.logging.format);
        std::env::set_var("LOG_OUTPUT", &self.logging.output);
        std::env::set_var("LOG_DIR", &self.logging.directory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonhouse_ingest::BackendKind;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.logging.output, "stdout");
        assert_eq!(config.registry.refresh().interval, Duration::from_secs(900));
        assert!(config.storage.manifest_dir.is_none());
    }

    #[test]
    fn test_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
server:
  port: 9200
ingest:
  default_backend: manifest
  tables:
    metrics:
      use_common_table: true
registry:
  tables:
    - "CREATE TABLE logs (msg String)"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.port, 9200);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.ingest.default_backend, BackendKind::Manifest);
        assert!(config.ingest.uses_common_table("metrics"));
        assert_eq!(config.ingest.promotion.field_frequency, 10);
        assert_eq!(config.registry.tables.len(), 1);
    }

    #[test]
    fn test_env_var_override() {
        let env: HashMap<&str, &str> = [
            ("JSONHOUSE_SERVER_PORT", "9090"),
            ("JSONHOUSE_CLUSTER", "main"),
            ("JSONHOUSE_MANIFEST_DIR", "/var/lib/jsonhouse"),
            ("LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.ingest.cluster_name.as_deref(), Some("main"));
        assert_eq!(config.storage.manifest_dir, Some(PathBuf::from("/var/lib/jsonhouse")));
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.output, "stdout");
    }

    #[test]
    fn test_invalid_port_rejected() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| {
            (name == "JSONHOUSE_SERVER_PORT").then(|| "eighty".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar { .. })));
    }
}
