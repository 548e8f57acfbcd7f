//! Configuration for the cosmetics core.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::achievements::Condition;
use crate::error::{CosmeticsError, Result};
use crate::types::{AccessRule, Category};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CosmeticsConfig {
    /// Ownership oracle settings
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Session lifecycle settings
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Persistence settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Built-in effect settings
    #[serde(default)]
    pub effects: EffectsConfig,
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,
    /// Item catalog
    #[serde(default)]
    pub items: Vec<ItemConfig>,
    /// Achievement definitions
    #[serde(default)]
    pub achievements: Vec<AchievementConfig>,
}

impl CosmeticsConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> std::result::Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Read and parse a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CosmeticsError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
            .map_err(|e| CosmeticsError::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Ownership oracle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Bounded wait for one ownership query (ms)
    #[serde(default = "default_oracle_timeout")]
    pub timeout_ms: u64,
    /// Cache answers per entity until its session ends
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_oracle_timeout(),
            cache_enabled: true,
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Re-activate persisted items when a session starts
    #[serde(default = "default_true")]
    pub restore_on_join: bool,
    /// Persist the active set when a session ends
    #[serde(default = "default_true")]
    pub persist_on_leave: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            restore_on_join: true,
            persist_on_leave: true,
        }
    }
}

/// Which ownership store backs the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    File,
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend kind
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Directory for per-entity records (file backend)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: default_data_dir(),
        }
    }
}

/// Built-in effect configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectsConfig {
    /// Interval between ticks of repeating effects (ms)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
        }
    }
}

/// General configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// One catalog entry as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemConfig {
    /// Unique id
    pub id: String,
    /// Display name (defaults to the id)
    #[serde(default)]
    pub name: Option<String>,
    /// Category
    pub category: Category,
    /// Price in credits; 0 = free
    #[serde(default)]
    pub cost: u64,
    /// Access gate
    #[serde(flatten)]
    pub access: AccessRule,
}

/// One achievement as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementConfig {
    /// Unique id
    pub id: String,
    /// Display name
    pub name: String,
    /// Credits paid out on unlock
    #[serde(default)]
    pub reward: u64,
    /// Unlock condition
    pub condition: Condition,
}

// Defaults
fn default_oracle_timeout() -> u64 { 2000 }
fn default_true() -> bool { true }
fn default_backend() -> StorageBackend { StorageBackend::Memory }
fn default_data_dir() -> PathBuf { PathBuf::from("data/cosmetics") }
fn default_tick_interval() -> u64 { 250 }
fn default_log_level() -> String { "info".to_string() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CosmeticsConfig::default();
        assert_eq!(config.oracle.timeout_ms, 2000);
        assert!(config.oracle.cache_enabled);
        assert!(config.lifecycle.restore_on_join);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(config.items.is_empty());
    }

    #[test]
    fn test_parse_items_and_achievements() {
        let yaml = r#"
oracle:
  timeout_ms: 500
storage:
  backend: file
  data_dir: /tmp/cosmetics
items:
  - id: hat_red
    category: hat
  - id: wings_gold
    name: Golden Wings
    category: wings
    cost: 500
    required_flags: [vip]
    min_tier: 2
achievements:
  - id: milliner
    name: Milliner
    reward: 50
    condition:
      type: collector
      category: hat
  - id: big_spender
    name: Big Spender
    condition:
      type: score
      counter: credits_spent
      at_least: 1000
"#;

        let config = CosmeticsConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.oracle.timeout_ms, 500);
        assert!(config.oracle.cache_enabled);
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.items.len(), 2);

        let wings = &config.items[1];
        assert_eq!(wings.category, Category::Wings);
        assert_eq!(wings.cost, 500);
        assert_eq!(wings.access.required_flags, vec!["vip".to_string()]);
        assert_eq!(wings.access.min_tier, Some(2));
        assert!(config.items[0].access.is_open());

        assert_eq!(config.achievements.len(), 2);
        assert_eq!(config.achievements[1].reward, 0);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = CosmeticsConfig::default();
        config.general.log_level = "debug".to_string();
        let yaml = config.to_yaml().unwrap();
        let parsed = CosmeticsConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.general.log_level, "debug");
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = CosmeticsConfig::load("/nonexistent/cosmetics.yml").unwrap_err();
        assert!(matches!(err, CosmeticsError::Config(_)));
    }
}
