//! File and environment configuration
//!
//! ```yaml
//! url: mongodb://localhost:27017
//! database: app
//! reconnectDelayMs: 5000
//! defaultQueryPart:
//!   status: { default: active }
//! models:
//!   users: { name: "", age: 0 }
//! ```

use bson::Document;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::connection::ReconnectPolicy;
use crate::defaults::DefaultFieldPolicy;
use crate::driver::mongo::PoolConfig;
use crate::model::ModelRegistry;

/// Environment variable overriding `url`
pub const ENV_URI: &str = "DOCKET_MONGODB_URI";
/// Environment variable overriding `database`
pub const ENV_DATABASE: &str = "DOCKET_MONGODB_DATABASE";

const DEFAULT_URL: &str = "mongodb://localhost:27017";
const DEFAULT_DATABASE: &str = "docket";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Model for collection '{collection}' must be a document")]
    ModelNotDocument { collection: String },

    #[error("Field '{field}' has unsupported sentinel type {found}")]
    UnsupportedFieldType { field: String, found: String },
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

/// Settings for one data-access layer instance
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocketConfig {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Fields forced into every query and inserted record
    #[serde(default)]
    pub default_query_part: DefaultFieldPolicy,

    /// Collection name → sentinel document
    #[serde(default)]
    pub models: Document,

    #[serde(default)]
    pub app_name: Option<String>,

    #[serde(default)]
    pub max_pool_size: Option<u32>,

    #[serde(default)]
    pub min_pool_size: Option<u32>,
}

impl Default for DocketConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            database: default_database(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            default_query_part: DefaultFieldPolicy::default(),
            models: Document::new(),
            app_name: None,
            max_pool_size: None,
            min_pool_size: None,
        }
    }
}

impl DocketConfig {
    /// Load a config file, picking the format from its extension
    ///
    /// `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&contents)
        } else {
            Self::from_yaml_str(&contents)
        }
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Override url and database from `DOCKET_MONGODB_URI` / `DOCKET_MONGODB_DATABASE`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_URI).filter(|value| !value.is_empty()) {
            self.url = url;
        }
        if let Some(database) = lookup(ENV_DATABASE).filter(|value| !value.is_empty()) {
            self.database = database;
        }
    }

    /// Build the model registry from the configured sentinels
    pub fn registry(&self) -> Result<ModelRegistry, ConfigError> {
        ModelRegistry::from_sentinels(&self.models)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::fixed(Duration::from_millis(self.reconnect_delay_ms))
    }

    /// Pool settings for [`crate::driver::mongo::MongoConnector`]
    pub fn pool_config(&self) -> PoolConfig {
        let mut pool = PoolConfig::default();
        if let Some(app_name) = &self.app_name {
            pool.app_name = Some(app_name.clone());
        }
        if self.max_pool_size.is_some() {
            pool.max_pool_size = self.max_pool_size;
        }
        if self.min_pool_size.is_some() {
            pool.min_pool_size = self.min_pool_size;
        }
        pool
    }
}
