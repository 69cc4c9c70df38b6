//! Store configuration.
//!
//! Loaded from a JSON file or from `MX_STORE_*` environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub const ENV_DATABASE_URL: &str = "MX_STORE_DATABASE_URL";
pub const ENV_ACCOUNT_ID: &str = "MX_STORE_ACCOUNT_ID";
pub const ENV_PICKLE_KEY: &str = "MX_STORE_PICKLE_KEY";
pub const ENV_MAX_CONNECTIONS: &str = "MX_STORE_MAX_CONNECTIONS";

#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `postgres://…` or `sqlite://…` URL.
    pub database_url: String,
    /// Owner scope for every account-bound row.
    pub account_id: String,
    /// Passphrase the pickling key is derived from.
    pub pickle_key: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// SQLite only: how long a writer waits on a locked database.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_secs() -> u64 {
    5
}

impl StoreConfig {
    pub fn new(
        database_url: impl Into<String>,
        account_id: impl Into<String>,
        pickle_key: impl Into<String>,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            account_id: account_id.into(),
            pickle_key: pickle_key.into(),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }

    /// Read the configuration from `MX_STORE_*` environment variables.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| StoreError::Config(format!("{name} not set")))
        };

        let mut config = Self::new(
            required(ENV_DATABASE_URL)?,
            required(ENV_ACCOUNT_ID)?,
            required(ENV_PICKLE_KEY)?,
        );
        if let Some(raw) = lookup(ENV_MAX_CONNECTIONS) {
            config.max_connections = raw
                .parse()
                .map_err(|_| StoreError::Config(format!("{ENV_MAX_CONNECTIONS} is not a number: {raw}")))?;
        }
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&raw).map_err(|e| StoreError::Config(format!("parse {}: {e}", path.display())))
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("database_url", &self.database_url)
            .field("account_id", &self.account_id)
            .field("pickle_key", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("busy_timeout_secs", &self.busy_timeout_secs)
            .finish()
    }
}
