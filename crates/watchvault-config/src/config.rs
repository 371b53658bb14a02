use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from `config.toml`.
///
/// Retention itself (`off` | days) is deliberately not here: it lives in the
/// persisted store settings next to the data it governs, and is edited
/// through the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_lifecycle_config")]
    pub lifecycle: LifecycleConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Override for the store directory; defaults to the platform data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Backend quota in bytes. None disables quota-pressure eviction.
    #[serde(default)]
    pub quota_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// How often the daemon runs the age-based cleanup cycle.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// How often the daemon polls backend usage for quota pressure.
    #[serde(default = "default_quota_poll_interval_secs")]
    pub quota_poll_interval_secs: u64,
    /// Fraction of quota at which pressure-relief eviction starts.
    #[serde(default = "default_quota_high_water")]
    pub quota_high_water: f64,
    /// Minimum wall-clock gap between evaluated cleanup cycles.
    #[serde(default = "default_min_cleanup_interval_secs")]
    pub min_cleanup_interval_secs: u64,
    /// What happens to a library record when its last playlist reference
    /// goes away: delete immediately, or leave it for the next sweep.
    #[serde(default)]
    pub library_removal: LibraryRemoval,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LibraryRemoval {
    #[default]
    Immediate,
    Deferred,
}

fn default_cleanup_interval_secs() -> u64 {
    21_600 // 6 hours
}

fn default_quota_poll_interval_secs() -> u64 {
    60
}

fn default_quota_high_water() -> f64 {
    0.9
}

fn default_min_cleanup_interval_secs() -> u64 {
    3_600
}

pub fn default_lifecycle_config() -> LifecycleConfig {
    LifecycleConfig {
        cleanup_interval_secs: default_cleanup_interval_secs(),
        quota_poll_interval_secs: default_quota_poll_interval_secs(),
        quota_high_water: default_quota_high_water(),
        min_cleanup_interval_secs: default_min_cleanup_interval_secs(),
        library_removal: LibraryRemoval::default(),
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        default_lifecycle_config()
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file {:?}", path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.lifecycle.cleanup_interval_secs, 21_600);
        assert_eq!(config.lifecycle.quota_high_water, 0.9);
        assert_eq!(config.lifecycle.library_removal, LibraryRemoval::Immediate);
        assert!(config.storage.quota_bytes.is_none());
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.storage.quota_bytes = Some(5 * 1024 * 1024);
        config.lifecycle.library_removal = LibraryRemoval::Deferred;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.storage.quota_bytes, Some(5 * 1024 * 1024));
        assert_eq!(loaded.lifecycle.library_removal, LibraryRemoval::Deferred);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[lifecycle]\nquota_poll_interval_secs = 10\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.lifecycle.quota_poll_interval_secs, 10);
        assert_eq!(config.lifecycle.min_cleanup_interval_secs, 3_600);
    }
}
