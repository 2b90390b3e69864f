//! Application configuration management.
//!
//! This module handles loading and saving the configuration: backend base
//! URL, request timeout, renewal interval, auth endpoint paths and where the
//! credential pair is persisted.
//!
//! Configuration is stored at `~/.config/sessionward/config.json`; a few
//! settings can be overridden from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::{FileTokenStorage, KeyringTokenStorage, MemoryTokenStorage, TokenStorage};

/// Application name used for config/data directory paths
const APP_NAME: &str = "sessionward";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// HTTP request timeout in seconds.
/// Backend calls that fan out to slower services can take a while.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Minutes between proactive renewals. Well inside typical access
/// credential lifetimes; the on-demand renewal covers any gap.
const DEFAULT_RENEWAL_INTERVAL_MINS: u64 = 30;

/// Upper bound for the renewal interval: one day.
const MAX_RENEWAL_INTERVAL_MINS: u64 = 24 * 60;

/// Upper bound for the request timeout: one hour.
const MAX_REQUEST_TIMEOUT_SECS: u64 = 60 * 60;

const ENV_BASE_URL: &str = "SESSIONWARD_BASE_URL";
const ENV_TIMEOUT_SECS: &str = "SESSIONWARD_TIMEOUT_SECS";
const ENV_RENEWAL_MINS: &str = "SESSIONWARD_RENEWAL_MINS";

/// Paths of the authentication endpoints, relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthEndpoints {
    pub login: String,
    pub refresh: String,
    pub logout: String,
    pub me: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: "/users/auth/login/".to_string(),
            refresh: "/users/auth/refresh/".to_string(),
            logout: "/users/auth/logout/".to_string(),
            me: "/users/auth/me/".to_string(),
        }
    }
}

/// Where the credential pair lives between runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub renewal_interval_mins: u64,
    pub endpoints: AuthEndpoints,
    pub storage: StorageKind,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            renewal_interval_mins: DEFAULT_RENEWAL_INTERVAL_MINS,
            endpoints: AuthEndpoints::default(),
            storage: StorageKind::default(),
            last_email: None,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file; defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from a key lookup (the process environment in `load`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            self.request_timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of seconds", ENV_TIMEOUT_SECS))?;
        }
        if let Some(mins) = lookup(ENV_RENEWAL_MINS) {
            self.renewal_interval_mins = mins
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of minutes", ENV_RENEWAL_MINS))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            anyhow::bail!("base_url must not be empty");
        }
        if !(1..=MAX_REQUEST_TIMEOUT_SECS).contains(&self.request_timeout_secs) {
            anyhow::bail!(
                "request_timeout_secs must be between 1 and {}",
                MAX_REQUEST_TIMEOUT_SECS
            );
        }
        if !(1..=MAX_RENEWAL_INTERVAL_MINS).contains(&self.renewal_interval_mins) {
            anyhow::bail!(
                "renewal_interval_mins must be between 1 and {}",
                MAX_RENEWAL_INTERVAL_MINS
            );
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_mins.saturating_mul(60))
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Open the configured persistence backend.
    pub fn token_storage(&self) -> Result<Box<dyn TokenStorage>> {
        Ok(match self.storage {
            StorageKind::File => Box::new(FileTokenStorage::in_dir(&self.data_dir()?)),
            StorageKind::Keyring => Box::new(KeyringTokenStorage::new(self.account_name())),
            StorageKind::Memory => Box::new(MemoryTokenStorage::new()),
        })
    }

    /// Keychain account: one credential pair per backend.
    fn account_name(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }
}
