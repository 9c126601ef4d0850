use crate::error::ConfigError;
use serde::Deserialize;
use std::env;
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub tzkt: TzktConfig,
    pub db: DbConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TzktConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub database: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_page_size() -> u64 {
    10_000
}

fn default_timeout_secs() -> u64 {
    4
}

impl Config {
    /// Reads the YAML file named by `CONFIG_PATH` (default `config.yaml`).
    /// `MONGO_URI` and `DB_NAME` override the `db` section when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        let mut config = Self::from_file(&path)?;

        if let Ok(uri) = env::var("MONGO_URI") {
            config.db.uri = uri;
        }
        if let Ok(name) = env::var("DB_NAME") {
            config.db.database = name;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Missing("server port"));
        }
        if self.server.metrics_port == 0 {
            return Err(ConfigError::Missing("server metrics port"));
        }
        if self.tzkt.url.is_empty() {
            return Err(ConfigError::Missing("tzkt url"));
        }
        if self.db.uri.is_empty() {
            return Err(ConfigError::Missing("db uri"));
        }
        if self.db.database.is_empty() {
            return Err(ConfigError::Missing("db database"));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.tzkt.timeout_secs)
    }
}
