//! Layered daemon configuration: built-in defaults, then an optional TOML
//! file, then environment variables, then explicit CLI flags — each layer
//! overriding only the fields the one below it actually set.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use astra_router_core::RouterConfig;
use serde::Deserialize;
use thiserror::Error;

fn default_control_bind() -> SocketAddr {
    "127.0.0.1:4100".parse().unwrap()
}

fn default_extension_bind() -> SocketAddr {
    "127.0.0.1:4101".parse().unwrap()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("invalid socket address {value:?}: {source}")]
    Addr { value: String, source: std::net::AddrParseError },
}

/// Fully resolved settings for one daemon run.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub router: RouterConfig,
    pub control_bind: SocketAddr,
    pub shared_secret: Option<String>,
    pub extension_bind: SocketAddr,
    pub log_level: String,
    pub default_deadline_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            control_bind: default_control_bind(),
            shared_secret: None,
            extension_bind: default_extension_bind(),
            log_level: "info".to_string(),
            default_deadline_secs: 30,
        }
    }
}

impl DaemonConfig {
    pub fn default_deadline(&self) -> Duration {
        Duration::from_secs(self.default_deadline_secs)
    }

    /// Overlay a parsed config file's fields, then the CLI/env-resolved
    /// overrides, onto the built-in defaults.
    pub fn resolve(file: Option<FileConfig>, overrides: CliOverrides) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(file) = file {
            file.apply(&mut config)?;
        }
        overrides.apply(&mut config)?;

        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Mirrors every tunable in [`DaemonConfig`] as an `Option`, deserialized
/// from an optional TOML config file. Absent fields fall through to
/// whatever the layer below already set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub control_bind: Option<String>,
    #[serde(default)]
    pub shared_secret: Option<String>,
    #[serde(default)]
    pub extension_bind: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub default_deadline_secs: Option<u64>,

    #[serde(default)]
    pub heartbeat_interval_secs: Option<u64>,
    #[serde(default)]
    pub heartbeat_timeout_secs: Option<u64>,
    #[serde(default)]
    pub grace_window_secs: Option<u64>,
    #[serde(default)]
    pub session_queue_cap: Option<usize>,
    #[serde(default)]
    pub global_pending_cap: Option<usize>,
    #[serde(default)]
    pub inactivity_sweep_secs: Option<u64>,
    #[serde(default)]
    pub idle_threshold_secs: Option<u64>,
}

impl FileConfig {
    fn apply(self, config: &mut DaemonConfig) -> Result<(), ConfigError> {
        if let Some(addr) = self.control_bind {
            config.control_bind = parse_addr(&addr)?;
        }
        if let Some(secret) = self.shared_secret {
            config.shared_secret = Some(secret);
        }
        if let Some(addr) = self.extension_bind {
            config.extension_bind = parse_addr(&addr)?;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(secs) = self.default_deadline_secs {
            config.default_deadline_secs = secs;
        }

        if let Some(v) = self.heartbeat_interval_secs {
            config.router.heartbeat_interval_secs = v;
        }
        if let Some(v) = self.heartbeat_timeout_secs {
            config.router.heartbeat_timeout_secs = v;
        }
        if let Some(v) = self.grace_window_secs {
            config.router.grace_window_secs = v;
        }
        if let Some(v) = self.session_queue_cap {
            config.router.session_queue_cap = v;
        }
        if let Some(v) = self.global_pending_cap {
            config.router.global_pending_cap = v;
        }
        if self.inactivity_sweep_secs.is_some() {
            config.router.inactivity_sweep_secs = self.inactivity_sweep_secs;
        }
        if let Some(v) = self.idle_threshold_secs {
            config.router.idle_threshold_secs = v;
        }
        Ok(())
    }
}

/// The subset of tunables exposed as CLI flags (clap resolves each one
/// against its `env` fallback, so a value here already reflects "CLI flag
/// if given, else environment variable, else unset").
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub control_bind: Option<SocketAddr>,
    pub shared_secret: Option<String>,
    pub extension_bind: Option<SocketAddr>,
    pub log_level: Option<String>,
    pub heartbeat_interval_secs: Option<u64>,
    pub heartbeat_timeout_secs: Option<u64>,
}

impl CliOverrides {
    fn apply(self, config: &mut DaemonConfig) -> Result<(), ConfigError> {
        if let Some(addr) = self.control_bind {
            config.control_bind = addr;
        }
        if let Some(secret) = self.shared_secret {
            config.shared_secret = Some(secret);
        }
        if let Some(addr) = self.extension_bind {
            config.extension_bind = addr;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(v) = self.heartbeat_interval_secs {
            config.router.heartbeat_interval_secs = v;
        }
        if let Some(v) = self.heartbeat_timeout_secs {
            config.router.heartbeat_timeout_secs = v;
        }
        Ok(())
    }
}

fn parse_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|source| ConfigError::Addr {
        value: value.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_and_overrides_yield_defaults() {
        let config = DaemonConfig::resolve(None, CliOverrides::default()).unwrap();
        assert_eq!(config.control_bind, default_control_bind());
        assert_eq!(config.router.heartbeat_interval_secs, 30);
    }

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let file = FileConfig {
            heartbeat_interval_secs: Some(15),
            control_bind: Some("127.0.0.1:9000".to_string()),
            ..Default::default()
        };
        let overrides = CliOverrides {
            heartbeat_interval_secs: Some(5),
            ..Default::default()
        };
        let config = DaemonConfig::resolve(Some(file), overrides).unwrap();
        assert_eq!(config.router.heartbeat_interval_secs, 5);
        assert_eq!(config.control_bind, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn toml_document_parses_into_file_config() {
        let toml = r#"
            control_bind = "0.0.0.0:5000"
            heartbeat_interval_secs = 45
        "#;
        let file: FileConfig = toml::from_str(toml).unwrap();
        assert_eq!(file.control_bind.as_deref(), Some("0.0.0.0:5000"));
        assert_eq!(file.heartbeat_interval_secs, Some(45));
    }
}
