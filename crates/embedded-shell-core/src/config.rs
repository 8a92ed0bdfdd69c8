//! Engine configuration.
//!
//! Loaded with the following priority (highest to lowest):
//! 1. Environment variables (`EMBEDDED_SHELL_*`)
//! 2. Configuration file (JSON)
//! 3. Default values

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Deadline for an invocation to reach a terminal state (milliseconds).
    pub invocation_timeout_ms: u64,
    /// Idle time after which a session expires (seconds).
    pub session_ttl_secs: u64,
    /// Output history retained per invocation (bytes).
    pub history_limit_bytes: usize,
    /// Session store backend.
    pub store: StoreSection,
    /// Listener settings for the transport.
    pub server: ServerSection,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            invocation_timeout_ms: 60_000,
            session_ttl_secs: 1_800,
            history_limit_bytes: crate::frame_store::DEFAULT_HISTORY_BYTES,
            store: StoreSection::default(),
            server: ServerSection::default(),
        }
    }
}

/// Session store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    /// One key-value node.
    #[default]
    Standalone,
    /// Keys sharded over several nodes by hash slot.
    Cluster,
}

/// Where session records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// In-process nodes. Sessions are not shared with other processes.
    #[default]
    Memory,
    /// A Redis server or Redis Cluster shared by every instance.
    Redis,
}

/// Store configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub backend: StoreKind,
    pub mode: StoreMode,
    /// In-memory node count when `mode` is `cluster`.
    pub cluster_nodes: usize,
    /// Redis server URL for standalone mode.
    pub url: String,
    /// Redis Cluster seed node URLs for cluster mode.
    pub nodes: Vec<String>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreKind::Memory,
            mode: StoreMode::Standalone,
            cluster_nodes: 3,
            url: "redis://127.0.0.1:6379".to_string(),
            nodes: Vec::new(),
        }
    }
}

/// Server configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl ShellConfig {
    /// Parse configuration from JSON text. Missing fields take defaults.
    ///
    /// # Errors
    /// Returns error if the text is not valid configuration JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Load defaults, then the optional file, then environment overrides.
    ///
    /// # Errors
    /// Returns error if the file or an environment value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (normally the process environment).
    ///
    /// # Errors
    /// Returns error if a present variable cannot be parsed.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("EMBEDDED_SHELL_INVOCATION_TIMEOUT_MS") {
            self.invocation_timeout_ms = parse_var("EMBEDDED_SHELL_INVOCATION_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("EMBEDDED_SHELL_SESSION_TTL_SECS") {
            self.session_ttl_secs = parse_var("EMBEDDED_SHELL_SESSION_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("EMBEDDED_SHELL_STORE_MODE") {
            self.store.mode = match v.as_str() {
                "standalone" => StoreMode::Standalone,
                "cluster" => StoreMode::Cluster,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "EMBEDDED_SHELL_STORE_MODE",
                        value: v,
                    });
                }
            };
        }
        if let Some(v) = lookup("EMBEDDED_SHELL_CLUSTER_NODES") {
            self.store.cluster_nodes = parse_var("EMBEDDED_SHELL_CLUSTER_NODES", &v)?;
        }
        if let Some(v) = lookup("EMBEDDED_SHELL_STORE_BACKEND") {
            self.store.backend = match v.as_str() {
                "memory" => StoreKind::Memory,
                "redis" => StoreKind::Redis,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "EMBEDDED_SHELL_STORE_BACKEND",
                        value: v,
                    });
                }
            };
        }
        if let Some(v) = lookup("EMBEDDED_SHELL_REDIS_URL") {
            self.store.url = v;
        }
        if let Some(v) = lookup("EMBEDDED_SHELL_REDIS_NODES") {
            self.store.nodes = v
                .split(',')
                .map(str::trim)
                .filter(|node| !node.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Some(v) = lookup("EMBEDDED_SHELL_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("EMBEDDED_SHELL_PORT") {
            self.server.port = parse_var("EMBEDDED_SHELL_PORT", &v)?;
        }
        Ok(())
    }

    #[must_use]
    pub const fn invocation_timeout(&self) -> Duration {
        Duration::from_millis(self.invocation_timeout_ms)
    }

    #[must_use]
    pub const fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShellConfig::default();
        assert_eq!(config.invocation_timeout(), Duration::from_secs(60));
        assert_eq!(config.store.mode, StoreMode::Standalone);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_partial_json() {
        let config = ShellConfig::from_json_str(
            r#"{ "invocation_timeout_ms": 500, "store": { "mode": "cluster" } }"#,
        )
        .unwrap();
        assert_eq!(config.invocation_timeout_ms, 500);
        assert_eq!(config.store.mode, StoreMode::Cluster);
        assert_eq!(config.store.cluster_nodes, 3);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("EMBEDDED_SHELL_PORT", "9000"),
            ("EMBEDDED_SHELL_STORE_MODE", "cluster"),
            ("EMBEDDED_SHELL_CLUSTER_NODES", "6"),
        ]);
        let mut config = ShellConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.store.mode, StoreMode::Cluster);
        assert_eq!(config.store.cluster_nodes, 6);
    }

    #[test]
    fn test_redis_store_section() {
        let config = ShellConfig::from_json_str(
            r#"{ "store": { "backend": "redis", "mode": "cluster",
                 "nodes": ["redis://10.0.0.1:7000", "redis://10.0.0.2:7000"] } }"#,
        )
        .unwrap();
        assert_eq!(config.store.backend, StoreKind::Redis);
        assert_eq!(config.store.nodes.len(), 2);
        assert_eq!(config.store.url, "redis://127.0.0.1:6379");

        let vars: HashMap<&str, &str> = HashMap::from([
            ("EMBEDDED_SHELL_STORE_BACKEND", "redis"),
            ("EMBEDDED_SHELL_REDIS_URL", "redis://cache:6379/2"),
            ("EMBEDDED_SHELL_REDIS_NODES", "redis://a:7000, redis://b:7000,"),
        ]);
        let mut config = ShellConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.store.backend, StoreKind::Redis);
        assert_eq!(config.store.url, "redis://cache:6379/2");
        assert_eq!(config.store.nodes, vec!["redis://a:7000", "redis://b:7000"]);

        let err = ShellConfig::default()
            .apply_overrides(|k| (k == "EMBEDDED_SHELL_STORE_BACKEND").then(|| "etcd".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("EMBEDDED_SHELL_STORE_BACKEND"));
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = ShellConfig::default();
        let err = config
            .apply_overrides(|k| (k == "EMBEDDED_SHELL_PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("EMBEDDED_SHELL_PORT"));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            ShellConfig::from_json_str("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }
}
