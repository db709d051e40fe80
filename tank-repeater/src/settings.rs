//! Application settings

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tank_mux::{RepeaterConfig, DEFAULT_PRODUCT_ID};
use tank_sim::{FeedMode, SeeLevelConfig};

/// Simulator options used with the `simulate` and `auto` words
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulatorSettings {
    /// Time between simulated tank reports (ms)
    pub period_ms: u64,
    /// Deliver whole updates or per-path signals
    pub feed_mode: FeedMode,
    /// Tank levels and rates
    pub seelevel: SeeLevelConfig,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            period_ms: 1000,
            feed_mode: FeedMode::default(),
            seelevel: SeeLevelConfig::default(),
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Product id of the incoming tank service, -1 disables the repeater
    #[serde(default = "default_product_id")]
    pub product_id: i64,
    /// Period between incoming service checks (ms)
    #[serde(default = "default_scan_period")]
    pub scan_period_ms: u64,
    /// Engine configuration
    #[serde(default)]
    pub repeater: RepeaterConfig,
    /// Simulator configuration
    #[serde(default)]
    pub simulator: SimulatorSettings,
}

fn default_product_id() -> i64 {
    DEFAULT_PRODUCT_ID
}

fn default_scan_period() -> u64 {
    1000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            product_id: default_product_id(),
            scan_period_ms: default_scan_period(),
            repeater: RepeaterConfig::default(),
            simulator: SimulatorSettings::default(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for tank-repeater
    /// Uses $XDG_CONFIG_HOME/tank-repeater, falls back to ~/.config/tank-repeater
    pub fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("tank-repeater"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("tank-repeater"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Get the path of the persisted slot registry
    pub fn registry_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("registry.json"))
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        Self::settings_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Load settings from a file, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable settings in {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save settings to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::settings_path().context("Could not determine settings path")?;
        self.save_to(&path)
    }

    /// Save settings to a file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json).context("Failed to write settings")?;

        Ok(())
    }
}
