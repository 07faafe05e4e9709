//! # Configuration Management Module
//!
//! TOML configuration for the prototype engine and its CLI.
//!
//! ## Configuration Structure
//!
//! - [`StorageConfig`] - where the sled database lives
//! - [`LoggingConfig`] - log level and optional log file
//! - [`SpawnerConfig`] - base typeclass, extra typeclasses, prototype files and spawn policy
//!
//! ## Usage
//!
//! ```rust,no_run
//! use protospawn::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("protospawn.toml").await?;
//!     println!("Data dir: {}", config.storage.data_dir);
//!
//!     Config::create_default("protospawn.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [storage]
//! data_dir = "data/protospawn"
//!
//! [logging]
//! level = "info"
//! file = "protospawn.log"
//!
//! [spawner]
//! base_typeclass = "typeclasses.objects.Object"
//! default_home = "#1"
//! prototype_modules = ["data/prototypes/world.json"]
//! exec_permission = "Developer"
//! ```
//!
//! Every section is optional; missing sections and fields fall back to defaults.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

use crate::prototype::types::DEFAULT_BASE_TYPECLASS;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub spawner: SpawnerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data/protospawn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("protospawn.log".to_string()),
        }
    }
}

/// Engine settings decided once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnerConfig {
    /// Typeclass given to parentless prototypes that name none.
    #[serde(default = "default_base_typeclass")]
    pub base_typeclass: String,
    /// Home for spawned entities whose prototype names none. A missing
    /// entity here is logged and ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_home: Option<String>,
    /// Typeclass paths resolvable in addition to the stock set.
    #[serde(default)]
    pub typeclasses: Vec<String>,
    /// JSON files holding read-only prototypes.
    #[serde(default)]
    pub prototype_modules: Vec<PathBuf>,
    /// Top-level keys kept as-is by the normalizer instead of becoming attributes.
    #[serde(default)]
    pub reserved_keys: Vec<String>,
    #[serde(default = "default_raise_on_bad_function")]
    pub raise_on_bad_function: bool,
    #[serde(default = "default_diff_max_depth")]
    pub diff_max_depth: usize,
    /// Permission required to spawn prototypes carrying `exec` snippets.
    #[serde(default = "default_exec_permission")]
    pub exec_permission: String,
}

fn default_base_typeclass() -> String {
    DEFAULT_BASE_TYPECLASS.to_string()
}

fn default_raise_on_bad_function() -> bool {
    true
}

fn default_diff_max_depth() -> usize {
    2
}

fn default_exec_permission() -> String {
    "Developer".to_string()
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            base_typeclass: default_base_typeclass(),
            default_home: None,
            typeclasses: Vec::new(),
            prototype_modules: Vec::new(),
            reserved_keys: Vec::new(),
            raise_on_bad_function: default_raise_on_bad_function(),
            diff_max_depth: default_diff_max_depth(),
            exec_permission: default_exec_permission(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        if config.spawner.diff_max_depth == 0 {
            return Err(anyhow!(
                "Invalid config {}: spawner.diff_max_depth must be at least 1",
                path
            ));
        }
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawner_defaults() {
        let config = SpawnerConfig::default();
        assert_eq!(config.base_typeclass, DEFAULT_BASE_TYPECLASS);
        assert!(config.raise_on_bad_function);
        assert_eq!(config.diff_max_depth, 2);
        assert_eq!(config.exec_permission, "Developer");
        assert!(config.default_home.is_none());
    }

    #[test]
    fn test_missing_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str("[spawner]\ndefault_home = \"#2\"\n").unwrap();
        assert_eq!(config.storage.data_dir, "data/protospawn");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.spawner.default_home.as_deref(), Some("#2"));
        assert_eq!(config.spawner.base_typeclass, DEFAULT_BASE_TYPECLASS);
    }

    #[test]
    fn test_default_config_serializes() {
        let content = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(content.contains("[spawner]"));
        let parsed: Config = toml::from_str(&content).unwrap();
        assert_eq!(parsed.spawner.exec_permission, "Developer");
    }

    #[tokio::test]
    async fn test_load_rejects_zero_diff_depth() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[spawner]\ndiff_max_depth = 0\n").unwrap();
        assert!(Config::load(path.to_str().unwrap()).await.is_err());

        let good = dir.path().join("good.toml");
        Config::create_default(good.to_str().unwrap()).await.unwrap();
        let config = Config::load(good.to_str().unwrap()).await.unwrap();
        assert_eq!(config.spawner.diff_max_depth, 2);
    }
}
