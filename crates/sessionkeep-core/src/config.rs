//! Application configuration management.
//!
//! Configuration is stored at `~/.config/sessionkeep/config.json`. The
//! session file (file storage) lives in `~/.cache/sessionkeep/`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::api::ApiClient;
use crate::auth::store::DEFAULT_NAMESPACE;
use crate::auth::token::DEFAULT_REFRESH_MARGIN_SECS;
use crate::auth::{CredentialStore, FileStore, KeyringStore, MemoryStore, RefreshOptions};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sessionkeep";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

pub const ENV_API_URL: &str = "SESSIONKEEP_API_URL";
pub const ENV_USERNAME: &str = "SESSIONKEEP_USERNAME";
pub const ENV_PASSWORD: &str = "SESSIONKEEP_PASSWORD";

/// Where the session credential is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub storage: StorageKind,
    pub namespace: String,
    pub refresh_margin_secs: i64,
    pub request_timeout_secs: u64,
    pub log_dir: Option<PathBuf>,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            storage: StorageKind::default(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            log_dir: None,
            last_username: None,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Persist `username` as the last used one, leaving environment
    /// overrides out of the file
    pub fn remember_username(username: &str) -> Result<()> {
        let path = Self::config_path()?;
        let mut stored = Self::load_from(&path)?;
        if stored.last_username.as_deref() == Some(username) {
            return Ok(());
        }
        stored.last_username = Some(username.to_string());
        stored.save_to(&path)
    }

    /// Override values from `lookup` (the process environment in `load`)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.is_empty()) {
            self.api_base_url = url;
        }
        if let Some(username) = lookup(ENV_USERNAME).filter(|v| !v.is_empty()) {
            self.last_username = Some(username);
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn refresh_options(&self) -> RefreshOptions {
        RefreshOptions {
            margin: chrono::Duration::seconds(self.refresh_margin_secs.max(0)),
            ..RefreshOptions::default()
        }
    }

    pub fn api_client(&self) -> Result<ApiClient> {
        ApiClient::new(&self.api_base_url, self.request_timeout_secs)
            .context("Failed to build HTTP client")
    }

    /// Open the configured credential store
    pub fn open_store(&self) -> Result<Arc<dyn CredentialStore>> {
        let store: Arc<dyn CredentialStore> = match self.storage {
            StorageKind::File => Arc::new(FileStore::new(&self.cache_dir()?, &self.namespace)),
            StorageKind::Keyring => Arc::new(KeyringStore::new(&self.namespace)),
            StorageKind::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }
}
