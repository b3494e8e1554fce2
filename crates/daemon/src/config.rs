//! Daemon configuration

use serde::{Deserialize, Serialize};
use skymock_common::EngineConfig;
use std::path::Path;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP listener
    pub listen: ListenConfig,

    /// Engine defaults and link generation
    pub engine: EngineConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListenConfig {
    /// Address the HTTP surface binds to
    pub address: String,

    /// Expose `POST /_reset`
    pub enable_reset: bool,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:4566".to_string(),
            enable_reset: true,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("skymock.toml");

        let mut config = DaemonConfig::default();
        config.listen.address = "0.0.0.0:8080".to_string();
        config.engine.project = "demo".to_string();
        config.engine.default_page_size = 50;
        config.save(&path).unwrap();

        assert_eq!(DaemonConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skymock.toml");
        std::fs::write(&path, "[engine]\nregion = \"europe-west1\"\n").unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.engine.region, "europe-west1");
        assert_eq!(config.engine.zone, "us-central1-a");
        assert_eq!(config.listen, ListenConfig::default());
    }
}
