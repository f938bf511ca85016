//! Server Configuration
//!
//! Loaded from `config.toml`. Every field has a default, so a missing file
//! or a partial one still yields a working configuration.
//!
//! ```toml
//! data_dir = "data"
//! log_filter = "quest_server=info"
//!
//! [persistence]
//! progress_interval_secs = 1
//! cooldown_interval_secs = 60
//! display_interval_secs = 1
//!
//! [catalog]
//! file = "quests.toml"
//! watch = false
//!
//! [permissions]
//! operators = ["admin"]
//!
//! [rewards]
//! items = ["diamond", "emerald", "iron_ingot"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory holding the catalog and player snapshots
    pub data_dir: PathBuf,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
    pub persistence: PersistenceConfig,
    pub catalog: CatalogConfig,
    pub permissions: PermissionsConfig,
    pub rewards: RewardsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_filter: "quest_server=info".to_string(),
            persistence: PersistenceConfig::default(),
            catalog: CatalogConfig::default(),
            permissions: PermissionsConfig::default(),
            rewards: RewardsConfig::default(),
        }
    }
}

/// Periods of the background tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub progress_interval_secs: u64,
    pub cooldown_interval_secs: u64,
    pub display_interval_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            progress_interval_secs: 1,
            cooldown_interval_secs: 60,
            display_interval_secs: 1,
        }
    }
}

impl PersistenceConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs.max(1))
    }

    pub fn cooldown_interval(&self) -> Duration {
        Duration::from_secs(self.cooldown_interval_secs.max(1))
    }

    pub fn display_interval(&self) -> Duration {
        Duration::from_secs(self.display_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Catalog file name, relative to `data_dir`
    pub file: PathBuf,
    /// Reload the catalog when the file changes on disk
    pub watch: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("quests.toml"),
            watch: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Players allowed to add, edit and delete quests
    pub operators: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    /// Item aliases the console host can hand out directly
    pub items: Vec<String>,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            items: ["diamond", "emerald", "gold_ingot", "iron_ingot", "bread"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist
    pub async fn load(path: &Path) -> Result<Self> {
        match Self::read(path).await? {
            Some(config) => Ok(config),
            None => {
                warn!("Config file {:?} not found, using defaults", path);
                Ok(Self::default())
            }
        }
    }

    /// Read configuration from `path`; `None` if the file does not exist.
    /// Logs nothing, so it can run before tracing is initialized.
    pub async fn read(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::from_toml(&content)
                .map(Some)
                .with_context(|| format!("Failed to parse config {:?}", path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read config {:?}", path)),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(&self.catalog.file)
    }

    pub fn progress_path(&self) -> PathBuf {
        self.data_dir.join("progress.json")
    }

    pub fn cooldown_path(&self) -> PathBuf {
        self.data_dir.join("cooldowns.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = ServerConfig::from_toml(
            r#"
data_dir = "/srv/quests"

[persistence]
cooldown_interval_secs = 120

[permissions]
operators = ["Admin"]
"#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/quests"));
        assert_eq!(config.persistence.progress_interval_secs, 1);
        assert_eq!(config.persistence.cooldown_interval(), Duration::from_secs(120));
        assert_eq!(config.permissions.operators, vec!["Admin"]);
        assert!(!config.catalog.watch);
        assert_eq!(config.catalog_path(), PathBuf::from("/srv/quests/quests.toml"));
        assert_eq!(config.progress_path(), PathBuf::from("/srv/quests/progress.json"));
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let config = ServerConfig::from_toml("[persistence]\nprogress_interval_secs = 0\n").unwrap();
        assert_eq!(config.persistence.progress_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        assert!(ServerConfig::from_toml("data_dir = 5").is_err());
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServerConfig::load(&temp_dir.path().join("config.toml")).await.unwrap();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.persistence.cooldown_interval_secs, 60);
    }

    #[tokio::test]
    async fn test_read_reports_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        assert!(ServerConfig::read(&path).await.unwrap().is_none());

        tokio::fs::write(&path, "log_filter = \"debug\"\n").await.unwrap();
        let config = ServerConfig::read(&path).await.unwrap().unwrap();
        assert_eq!(config.log_filter, "debug");
    }
}
