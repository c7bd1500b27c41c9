//! Proxy configuration, loaded from TOML

use crate::constants::{
    DEFAULT_AMI_PORT, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_KEEPALIVE_INTERVAL_MS,
    DEFAULT_LIVENESS_TIMEOUT_MS, DEFAULT_QUEUE_REFRESH_MS, DEFAULT_RECALL_WINDOW_SECS,
    DEFAULT_RECONNECT_DELAY_MS, DEFAULT_TIMEOUT_MS,
};
use crate::error::{AmiError, AmiResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Manager link parameters, read once when the transport starts
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AmiConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    /// Prefix prepended to outgoing numbers by `add_prefix`
    pub prefix: String,
    pub reconnect: bool,
    pub reconnect_delay_ms: u64,
    /// When set, the reconnect delay doubles after each failed attempt up to this cap
    pub max_reconnect_delay_ms: Option<u64>,
    pub connect_timeout_ms: u64,
    /// 0 disables keep-alive pings
    pub keepalive_interval_ms: u64,
    /// 0 disables the liveness check
    pub liveness_timeout_ms: u64,
}

impl Default for AmiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_AMI_PORT,
            username: String::new(),
            secret: String::new(),
            prefix: String::new(),
            reconnect: true,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_reconnect_delay_ms: None,
            connect_timeout_ms: DEFAULT_TIMEOUT_MS,
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            liveness_timeout_ms: DEFAULT_LIVENESS_TIMEOUT_MS,
        }
    }
}

impl std::fmt::Debug for AmiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .field("prefix", &self.prefix)
            .field("reconnect", &self.reconnect)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("max_reconnect_delay_ms", &self.max_reconnect_delay_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("keepalive_interval_ms", &self.keepalive_interval_ms)
            .field("liveness_timeout_ms", &self.liveness_timeout_ms)
            .finish()
    }
}

/// Top-level configuration of the proxy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub ami: AmiConfig,
    /// JSON structural description read on every link-ready
    pub structure_path: Option<PathBuf>,
    pub recall_window_secs: u64,
    pub command_timeout_ms: u64,
    /// Period of the queue details refresh; 0 disables it
    pub queue_refresh_interval_ms: u64,
    pub log_level: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            ami: AmiConfig::default(),
            structure_path: None,
            recall_window_secs: DEFAULT_RECALL_WINDOW_SECS,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            queue_refresh_interval_ms: DEFAULT_QUEUE_REFRESH_MS,
            log_level: Some("info".to_string()),
        }
    }
}

impl ProxyConfig {
    pub fn load(path: impl AsRef<Path>) -> AmiResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| AmiError::Config {
            message: format!("{}: {}", e, path.display()),
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> AmiResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| AmiError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AmiResult<()> {
        if self
            .ami
            .host
            .is_empty()
        {
            return Err(AmiError::Config {
                message: "ami.host must not be empty".to_string(),
            });
        }
        if self.recall_window_secs == 0 {
            return Err(AmiError::Config {
                message: "recall_window_secs must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
