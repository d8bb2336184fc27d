//! Configuration system for strata.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $STRATA_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/strata/config.toml
//!   3. ~/.config/strata/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub node: NodeConfig,
    pub cluster: ClusterConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address this node listens on for store traffic.
    /// Port 0 = OS-assigned (the registered address carries the real port).
    pub bind_addr: String,
    /// Logical node index claimed at registration.
    pub node_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Well-known rendezvous server address.
    pub rendezvous_addr: String,
    /// Connection attempts before giving up with ConnectionLost.
    pub connect_retries: u32,
    /// Backoff between connection attempts, in milliseconds.
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Elements per flushed column chunk.
    pub chunk_size: usize,
    /// Deadline for every blocking store operation, in seconds.
    pub op_timeout_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            cluster: ClusterConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".into(),
            node_index: 0,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            rendezvous_addr: "127.0.0.1:8440".into(),
            connect_retries: 5,
            retry_backoff_ms: 200,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            op_timeout_secs: 30,
        }
    }
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }
}

impl ClusterConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

// ── Path helpers ─────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_tmp().join(".config"))
        .join("strata")
}

fn home_or_tmp() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ──────────────────────────────────────────────────────────────────

impl StrataConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            StrataConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("STRATA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&StrataConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply STRATA_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("STRATA_NODE__BIND_ADDR") {
            self.node.bind_addr = v;
        }
        if let Ok(v) = std::env::var("STRATA_NODE__NODE_INDEX") {
            if let Ok(i) = v.parse() {
                self.node.node_index = i;
            }
        }
        if let Ok(v) = std::env::var("STRATA_CLUSTER__RENDEZVOUS_ADDR") {
            self.cluster.rendezvous_addr = v;
        }
        if let Ok(v) = std::env::var("STRATA_CLUSTER__CONNECT_RETRIES") {
            if let Ok(n) = v.parse() {
                self.cluster.connect_retries = n;
            }
        }
        if let Ok(v) = std::env::var("STRATA_STORE__CHUNK_SIZE") {
            if let Ok(n) = v.parse() {
                self.store.chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("STRATA_STORE__OP_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.store.op_timeout_secs = n;
            }
        }
    }
}
