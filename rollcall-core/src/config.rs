//! Process configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.rollcall/
//!   config.yaml     (optional; every field has a default)
//!   daemon.sock     (control socket, owned by rollcall-daemon)
//! ```
//!
//! # API pattern
//!
//! - `load_at(home)` reads `<home>/.rollcall/config.yaml`; used in tests with `TempDir`
//! - `load()` derives home from `dirs::home_dir()` and delegates to `load_at`
//!
//! Environment overrides (`ROLLCALL_BIND`, `ROLLCALL_DEV_MODE`) are applied by
//! [`Config::apply_env`], which reads from a caller-supplied lookup so tests never
//! touch the process environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_BIND: &str = "ROLLCALL_BIND";
pub const ENV_DEV_MODE: &str = "ROLLCALL_DEV_MODE";

// ---------------------------------------------------------------------------
// 1. Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub table_ttl_secs: u64,
    pub identity_ttl_secs: u64,
    pub buttons_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            table_ttl_secs: 60,
            identity_ttl_secs: 3600,
            buttons_ttl_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Upper bound on waiting for a named lock. `None` waits indefinitely.
    pub acquire_timeout_ms: Option<u64>,
}

impl LockConfig {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Per-connection event buffer. A full buffer counts as a failed write.
    pub channel_capacity: usize,
    pub keepalive_interval_secs: u64,
    pub stale_after_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            keepalive_interval_secs: 25,
            stale_after_secs: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    pub public_base_url: String,
    pub rush_images_bucket: String,
    pub button_html_bucket: String,
    /// Markup content longer than this many bytes is offloaded to the blob store.
    pub inline_content_limit: usize,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            public_base_url: "https://storage.googleapis.com".to_string(),
            rush_images_bucket: "rush-images".to_string(),
            button_html_bucket: "button-html".to_string(),
            inline_content_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// JSON fixture (`{"main": {title: rows}, "rush": {...}}`) loaded into the
    /// in-memory backing service at startup.
    pub seed_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            seed_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub main_workbook: String,
    pub rush_workbook: String,
    pub cache: CacheConfig,
    pub locks: LockConfig,
    pub notify: NotifyConfig,
    pub blob: BlobConfig,
    pub server: ServerConfig,
    /// Relaxes creator-only checks on polls.
    pub dev_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            main_workbook: "main".to_string(),
            rush_workbook: "rush".to_string(),
            cache: CacheConfig::default(),
            locks: LockConfig::default(),
            notify: NotifyConfig::default(),
            blob: BlobConfig::default(),
            server: ServerConfig::default(),
            dev_mode: false,
        }
    }
}

impl Config {
    /// `<home>/.rollcall/config.yaml`. Pure, no I/O.
    pub fn path_at(home: &Path) -> PathBuf {
        rollcall_dir_at(home).join("config.yaml")
    }

    /// Load from `<home>/.rollcall/config.yaml`; a missing file yields defaults.
    pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
        let path = Self::path_at(home);
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            source: e,
        })?;
        if contents.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
    }

    /// `load_at` convenience wrapper, with environment overrides applied.
    pub fn load() -> Result<Config, ConfigError> {
        let mut config = Self::load_at(&home()?)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `ROLLCALL_BIND` / `ROLLCALL_DEV_MODE` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup(ENV_BIND).filter(|v| !v.trim().is_empty()) {
            self.server.bind = bind.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_DEV_MODE) {
            self.dev_mode = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidOverride {
                        key: ENV_DEV_MODE,
                        value: raw,
                    })
                }
            };
        }
        Ok(())
    }

    pub fn table_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.table_ttl_secs)
    }

    pub fn identity_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.identity_ttl_secs)
    }

    pub fn buttons_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.buttons_ttl_secs)
    }
}

/// `<home>/.rollcall/`. Pure, no I/O.
pub fn rollcall_dir_at(home: &Path) -> PathBuf {
    home.join(".rollcall")
}

pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().unwrap();
        let config = Config::load_at(home.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.cache.table_ttl_secs, 60);
        assert_eq!(config.locks.acquire_timeout(), None);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let home = TempDir::new().unwrap();
        let path = Config::path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "cache:\n  table_ttl_secs: 5\nlocks:\n  acquire_timeout_ms: 250\n")
            .unwrap();

        let config = Config::load_at(home.path()).unwrap();
        assert_eq!(config.cache.table_ttl_secs, 5);
        assert_eq!(config.cache.identity_ttl_secs, 3600);
        assert_eq!(config.locks.acquire_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.server.bind, "127.0.0.1:3000");
    }

    #[test]
    fn malformed_yaml_names_the_file() {
        let home = TempDir::new().unwrap();
        let path = Config::path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "cache: [unclosed").unwrap();

        let err = Config::load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config
            .apply_env(|key| match key {
                ENV_BIND => Some("0.0.0.0:8080".into()),
                ENV_DEV_MODE => Some("true".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert!(config.dev_mode);
    }

    #[test]
    fn bad_dev_mode_value_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(|key| (key == ENV_DEV_MODE).then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { key: ENV_DEV_MODE, .. }));
    }
}
