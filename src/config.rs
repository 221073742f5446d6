//! Policy service configuration
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `POLICY_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix of every environment variable read by [`PolicyConfig::apply_env`]
pub const ENV_PREFIX: &str = "POLICY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// HTTP basic auth credentials for the policy service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// Where and how to reach the policy service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub proto: String,
    pub addr: String,
    pub port: u16,
    pub uploader_path: String,
    pub ingest_path: String,
    /// Full uploader URL; overrides proto/addr/port/path when set
    pub uploader_url: Option<String>,
    /// Full ingest URL; overrides proto/addr/port/path when set
    pub ingest_url: Option<String>,
    pub timeout_secs: u64,
    pub auth: Option<BasicAuth>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            proto: "http".to_string(),
            addr: "127.0.0.1".to_string(),
            port: 8181,
            uploader_path: "/uploader".to_string(),
            ingest_path: "/ingest".to_string(),
            uploader_url: None,
            ingest_url: None,
            timeout_secs: 30,
            auth: None,
        }
    }
}

impl PolicyConfig {
    /// Load configuration: defaults, then `path` (or the default config file
    /// if it exists), then the process environment.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_yaml_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Override fields from `POLICY_*` variables supplied by `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}_{}", ENV_PREFIX, name));

        if let Some(v) = var("PROTO") {
            self.proto = v;
        }
        if let Some(v) = var("ADDR") {
            self.addr = v;
        }
        if let Some(v) = var("PORT") {
            self.port = parse_var("PORT", &v)?;
        }
        if let Some(v) = var("UPLOADER_PATH") {
            self.uploader_path = v;
        }
        if let Some(v) = var("INGEST_PATH") {
            self.ingest_path = v;
        }
        if let Some(v) = var("UPLOADER_URL") {
            self.uploader_url = Some(v);
        }
        if let Some(v) = var("INGEST_URL") {
            self.ingest_url = Some(v);
        }
        if let Some(v) = var("TIMEOUT_SECS") {
            self.timeout_secs = parse_var("TIMEOUT_SECS", &v)?;
        }
        if let Some(username) = var("USERNAME") {
            self.auth = Some(BasicAuth {
                username,
                password: var("PASSWORD"),
            });
        }
        Ok(())
    }

    pub fn uploader_url(&self) -> String {
        self.uploader_url
            .clone()
            .unwrap_or_else(|| self.compose_url(&self.uploader_path))
    }

    pub fn ingest_url(&self) -> String {
        self.ingest_url
            .clone()
            .unwrap_or_else(|| self.compose_url(&self.ingest_path))
    }

    fn compose_url(&self, path: &str) -> String {
        format!("{}://{}:{}{}", self.proto, self.addr, self.port, path)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: format!("{}_{}", ENV_PREFIX, name),
        value: value.to_string(),
    })
}

/// `<config dir>/uploadmeta/config.yaml`, if the platform has a config dir
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("uploadmeta").join("config.yaml"))
}
