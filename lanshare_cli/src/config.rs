//! Configuration management for LanShare CLI

use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};
use lanshare_core::ServerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// LanShare CLI configuration
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identifier this device presents when pairing with others
    pub device_id: String,
    /// Name this device presents (defaults to hostname)
    pub device_name: Option<String>,
    /// Where accepted files are saved
    pub download_dir: Option<PathBuf>,
    /// Accept every offered file without prompting
    pub auto_accept: bool,
    pub server: ServerConfig,
}

impl Config {
    /// Get the config file path
    pub fn path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "lanshare", "lanshare")
            .context("Could not determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.json"))
    }

    /// Load config from file, or return default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Config =
            serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }

    /// Generate a device id if none is set. Returns true when one was created.
    pub fn ensure_device_id(&mut self) -> bool {
        if !self.device_id.trim().is_empty() {
            return false;
        }
        self.device_id = uuid::Uuid::new_v4().to_string();
        true
    }

    /// Load the config, creating and saving a device id on first use
    pub fn load_with_identity() -> Result<Self> {
        let mut config = Self::load()?;
        if config.ensure_device_id() {
            config.save()?;
        }
        Ok(config)
    }

    pub fn device_name(&self) -> String {
        self.device_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(lanshare_core::hostname)
    }

    /// Configured download directory, else the user's downloads folder
    pub fn download_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.download_dir {
            return Ok(dir.clone());
        }

        if let Some(dir) = UserDirs::new().and_then(|u| u.download_dir().map(Path::to_path_buf)) {
            return Ok(dir.join("LanShare"));
        }

        Ok(lanshare_core::identity::data_dir()?.join("downloads"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.device_id.is_empty());
        assert!(!config.auto_accept);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_ensure_device_id() {
        let mut config = Config::default();
        assert!(config.ensure_device_id());
        let id = config.device_id.clone();
        assert!(!config.ensure_device_id());
        assert_eq!(config.device_id, id);
    }

    #[test]
    fn test_device_name_falls_back_to_hostname() {
        let mut config = Config::default();
        assert_eq!(config.device_name(), lanshare_core::hostname());

        config.device_name = Some("Desk".to_string());
        assert_eq!(config.device_name(), "Desk");
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");

        let mut config = Config {
            download_dir: Some(temp_dir.path().join("in")),
            auto_accept: true,
            ..Config::default()
        };
        config.ensure_device_id();
        config.server.port = Some(5050);
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = Config::load_from(&temp_dir.path().join("none.json")).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"auto_accept":true}"#).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert!(loaded.auto_accept);
        assert!(loaded.device_id.is_empty());
    }
}
