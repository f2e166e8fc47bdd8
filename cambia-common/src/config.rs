//! Configuration loading for the Cambia upload client
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is not an error: a warning is logged and the
//! remaining tiers are used. A TOML file that exists but fails to parse is
//! reported as [`Error::Config`].

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable overriding the server base URL
pub const SERVER_ENV_VAR: &str = "CAMBIA_SERVER";

/// Environment variable overriding the TOML config path
pub const CONFIG_ENV_VAR: &str = "CAMBIA_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Base URL of the Cambia server (e.g. `https://logs.example.org/cambia`)
    #[serde(default)]
    pub server_url: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Capacity of the store event channel
    #[serde(default)]
    pub event_capacity: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Built-in defaults used when no other tier supplies a value
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub server_url: String,
    pub log_level: String,
    pub event_capacity: usize,
}

impl Default for CompiledDefaults {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3030".to_string(),
            log_level: default_log_level(),
            event_capacity: 1000,
        }
    }
}

/// Fully resolved client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_url: String,
    pub log_level: String,
    pub event_capacity: usize,
}

/// Platform config file location: `<config dir>/cambia/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cambia").join("config.toml"))
}

/// Load a TOML config file
///
/// Returns the default (empty) config when the file does not exist.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using defaults");
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;

    debug!(path = %path.display(), "Loaded TOML config");
    Ok(config)
}

/// Write a TOML config file, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Resolves [`ClientConfig`] from CLI overrides, environment, TOML and defaults
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    cli_server_url: Option<String>,
    cli_config_path: Option<PathBuf>,
    cli_log_level: Option<String>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server_url(mut self, url: Option<String>) -> Self {
        self.cli_server_url = url;
        self
    }

    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_config_path = path;
        self
    }

    pub fn with_log_level(mut self, level: Option<String>) -> Self {
        self.cli_log_level = level;
        self
    }

    /// Path of the TOML file that will be consulted, if any
    pub fn config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_config_path {
            return Some(path.clone());
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        default_config_path()
    }

    pub fn resolve(&self) -> Result<ClientConfig> {
        let defaults = CompiledDefaults::default();
        let toml_config = match self.config_path() {
            Some(path) => load_toml_config(&path)?,
            None => TomlConfig::default(),
        };

        let server_url = if let Some(url) = non_blank(self.cli_server_url.clone()) {
            info!("Server URL taken from command line");
            url
        } else if let Some(url) = non_blank(std::env::var(SERVER_ENV_VAR).ok()) {
            info!("Server URL taken from {}", SERVER_ENV_VAR);
            url
        } else if let Some(url) = non_blank(toml_config.server_url.clone()) {
            info!("Server URL taken from TOML config");
            url
        } else {
            defaults.server_url
        };

        let log_level = non_blank(self.cli_log_level.clone())
            .unwrap_or_else(|| toml_config.logging.level.clone());

        let event_capacity = match toml_config.event_capacity {
            Some(0) => {
                return Err(Error::Config(
                    "event_capacity must be greater than zero".to_string(),
                ))
            }
            Some(capacity) => capacity,
            None => defaults.event_capacity,
        };

        Ok(ClientConfig {
            server_url,
            log_level,
            event_capacity,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_defaults_to_info() {
        assert_eq!(LoggingConfig::default().level, "info");
    }

    #[test]
    fn test_toml_config_parses_partial_file() {
        let config: TomlConfig = toml::from_str("server_url = \"http://logs.local\"").unwrap();
        assert_eq!(config.server_url.as_deref(), Some("http://logs.local"));
        assert_eq!(config.logging.level, "info");
        assert!(config.event_capacity.is_none());
    }

    #[test]
    fn test_non_blank_filters_whitespace() {
        assert_eq!(non_blank(Some("  ".to_string())), None);
        assert_eq!(non_blank(None), None);
        assert_eq!(non_blank(Some("x".to_string())), Some("x".to_string()));
    }
}
