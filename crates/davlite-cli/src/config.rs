//! Configuration file support for the davlite CLI.
//!
//! The configuration lives in `davlite.toml` in the working directory
//! unless `--config` (or `DAVLITE_CONFIG`) points elsewhere. A missing file
//! is created with the defaults on first use.
//!
//! # Example configuration
//!
//! ```toml
//! listen_address = "0.0.0.0:8080"
//! storage_path = "./webdav-storage"
//! require_auth = true
//! users_file = "users.json"
//! realm = "WebDAV Server"
//! max_connections = 256
//! ```
//!
//! Relative paths are interpreted against the process working directory.

use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use davlite::ServerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Settings accepted by `davlite config <setting> <value>`.
pub const SETTINGS: &[&str] = &["auth", "listen", "storage", "usersfile", "realm", "max-connections"];

/// Errors from reading or updating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but is not valid TOML for [`Config`].
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// `config` was given a setting name it does not know.
    #[error("Unknown setting '{0}' (expected one of: {settings})", settings = SETTINGS.join(", "))]
    UnknownSetting(String),

    /// The value could not be parsed for the setting.
    #[error("Invalid value '{value}' for {setting}: {reason}")]
    InvalidValue {
        setting: &'static str,
        value: String,
        reason: String,
    },
}

/// Persistent server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Address the server binds to
    pub listen_address: SocketAddr,

    /// Directory exposed over WebDAV
    pub storage_path: PathBuf,

    /// Require HTTP Basic credentials on every request
    pub require_auth: bool,

    /// JSON credentials file
    pub users_file: PathBuf,

    /// Realm sent in authentication challenges
    pub realm: String,

    /// Maximum number of connections served at once
    pub max_connections: usize,
}

impl Default for Config {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            listen_address: server.listen_address,
            storage_path: server.storage_root,
            require_auth: server.require_auth,
            users_file: PathBuf::from("users.json"),
            realm: server.realm,
            max_connections: server.max_connections,
        }
    }
}

impl Config {
    /// Load the configuration at `path`, writing the defaults there first if
    /// the file does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            info!(path = %path.display(), "Created default configuration");
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Write the configuration to `path` through a temporary file and a rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
        tmp.write_all(content.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        tmp.persist(path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Update one setting from its command-line spelling.
    ///
    /// Returns a human-readable description of the new value.
    pub fn set(&mut self, setting: &str, value: &str) -> Result<String, ConfigError> {
        match setting.to_ascii_lowercase().as_str() {
            "auth" => {
                self.require_auth = parse_bool(value).ok_or_else(|| ConfigError::InvalidValue {
                    setting: "auth",
                    value: value.to_string(),
                    reason: "expected true or false".to_string(),
                })?;
                Ok(format!(
                    "Authentication {}",
                    if self.require_auth { "enabled" } else { "disabled" }
                ))
            }
            "listen" => {
                self.listen_address = value.parse().map_err(|e: std::net::AddrParseError| {
                    ConfigError::InvalidValue {
                        setting: "listen",
                        value: value.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(format!("Listen address set to: {}", self.listen_address))
            }
            "storage" => {
                self.storage_path = non_empty_path("storage", value)?;
                Ok(format!("Storage path set to: {}", self.storage_path.display()))
            }
            "usersfile" => {
                self.users_file = non_empty_path("usersfile", value)?;
                Ok(format!("Users file set to: {}", self.users_file.display()))
            }
            "realm" => {
                if value.contains('"') {
                    return Err(ConfigError::InvalidValue {
                        setting: "realm",
                        value: value.to_string(),
                        reason: "must not contain double quotes".to_string(),
                    });
                }
                self.realm = value.to_string();
                Ok(format!("Realm set to: {value}"))
            }
            "max-connections" => {
                self.max_connections = value
                    .parse::<usize>()
                    .ok()
                    .filter(|&n| n > 0)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        setting: "max-connections",
                        value: value.to_string(),
                        reason: "expected a positive integer".to_string(),
                    })?;
                Ok(format!("Max connections set to: {}", self.max_connections))
            }
            _ => Err(ConfigError::UnknownSetting(setting.to_string())),
        }
    }

    /// Settings as `(name, value)` pairs for display.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("listen_address", self.listen_address.to_string()),
            ("storage_path", self.storage_path.display().to_string()),
            ("require_auth", self.require_auth.to_string()),
            ("users_file", self.users_file.display().to_string()),
            ("realm", self.realm.clone()),
            ("max_connections", self.max_connections.to_string()),
        ]
    }

    /// Server settings derived from this configuration.
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            listen_address: self.listen_address,
            storage_root: self.storage_path.clone(),
            require_auth: self.require_auth,
            realm: self.realm.clone(),
            max_connections: self.max_connections,
            ..ServerConfig::default()
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn non_empty_path(setting: &'static str, value: &str) -> Result<PathBuf, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            setting,
            value: value.to_string(),
            reason: "path must not be empty".to_string(),
        });
    }
    Ok(PathBuf::from(value))
}
