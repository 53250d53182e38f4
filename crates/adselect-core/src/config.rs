use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AdSelectError, Result};

/// Top-level configuration for the ad-selection module.
///
/// Loaded from a TOML file; each section corresponds to one concern of the
/// persistence and telemetry stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdSelectConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub auction: AuctionConfig,
}

impl AdSelectConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AdSelectConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AdSelectError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Path of the SQLite database file.
    pub db_path: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            db_path: "adselect.db".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Capacity ceilings for the interaction registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum total rows in the registered-interactions table.
    pub max_registered_interactions_total: i64,
    /// Maximum rows per (ad_selection_id, destination) pair.
    pub max_registered_interactions_per_destination: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_registered_interactions_total: 1000,
            max_registered_interactions_per_destination: 10,
        }
    }
}

/// Expiry windows driving the garbage-collection passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Age after which ad-selection records are removed, in seconds.
    pub ad_selection_ttl_secs: i64,
    /// Most-recent consented-debug rows returned by the active query.
    pub consented_debug_max_entries: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            // 24 hours.
            ad_selection_ttl_secs: 86_400,
            consented_debug_max_entries: 1,
        }
    }
}

/// Auction-wide feature selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctionConfig {
    /// Route ad-selection reads through the unified tables instead of the
    /// legacy single-table schema.
    pub use_unified_tables: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AdSelectConfig::default();
        assert_eq!(config.limits.max_registered_interactions_total, 1000);
        assert_eq!(config.limits.max_registered_interactions_per_destination, 10);
        assert_eq!(config.retention.ad_selection_ttl_secs, 86_400);
        assert!(!config.auction.use_unified_tables);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AdSelectConfig::default();
        config.auction.use_unified_tables = true;
        config.limits.max_registered_interactions_total = 50;
        config.save(&path).unwrap();

        let loaded = AdSelectConfig::load(&path).unwrap();
        assert!(loaded.auction.use_unified_tables);
        assert_eq!(loaded.limits.max_registered_interactions_total, 50);
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let config = AdSelectConfig::load_or_default(&path);
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[auction]\nuse_unified_tables = true\n").unwrap();

        let config = AdSelectConfig::load(&path).unwrap();
        assert!(config.auction.use_unified_tables);
        assert_eq!(config.limits.max_registered_interactions_per_destination, 10);
    }
}
