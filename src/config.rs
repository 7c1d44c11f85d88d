//! Manager configuration.
//!
//! Stored at `~/.config/pkgmeta/config.toml`:
//!
//! ```toml
//! descriptor_dirs = ["/etc/pkgmeta/repositories.d"]
//! include_builtin = true
//! persist_cache = true
//! max_concurrent_fetches = 8
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fetch::DEFAULT_USER_AGENT;

const CONFIG_DIR: &str = "pkgmeta";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Extra directories scanned for `*.yaml` / `*.yml` descriptor files.
    #[serde(default)]
    pub descriptor_dirs: Vec<PathBuf>,

    /// Load the descriptors embedded in the binary.
    #[serde(default = "default_true")]
    pub include_builtin: bool,

    /// Cache directory (default: the platform cache dir + `pkgmeta`).
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Write cache entries to disk and reload them on start.
    #[serde(default = "default_true")]
    pub persist_cache: bool,

    /// Repositories fetched or queried at once by sweeps and batches.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_fetches() -> usize {
    8
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            descriptor_dirs: Vec::new(),
            include_builtin: true,
            cache_dir: None,
            persist_cache: true,
            max_concurrent_fetches: default_max_concurrent_fetches(),
            user_agent: default_user_agent(),
        }
    }
}

impl ManagerConfig {
    /// Load config from the default location; a missing file means defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&path, content).context("Failed to write config file")
    }

    /// Configured cache directory, or the platform default.
    pub fn resolved_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|d| d.join(CONFIG_DIR)))
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert!(config.include_builtin);
        assert!(config.persist_cache);
        assert_eq!(config.max_concurrent_fetches, 8);
        assert!(config.user_agent.starts_with("pkgmeta/"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "descriptor_dirs = [\"/srv/repos\"]\npersist_cache = false\n").unwrap();

        let config = ManagerConfig::load_from(&path).unwrap();
        assert_eq!(config.descriptor_dirs, vec![PathBuf::from("/srv/repos")]);
        assert!(!config.persist_cache);
        assert!(config.include_builtin);
        assert_eq!(config.max_concurrent_fetches, 8);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let config = ManagerConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(config.descriptor_dirs.is_empty());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_concurrent_fetches = \"lots\"").unwrap();
        assert!(ManagerConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = ManagerConfig {
            cache_dir: Some(PathBuf::from("/var/cache/pkgmeta")),
            ..Default::default()
        };
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ManagerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.cache_dir, config.cache_dir);
        assert_eq!(parsed.resolved_cache_dir(), Some(PathBuf::from("/var/cache/pkgmeta")));
    }
}
