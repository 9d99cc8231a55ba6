//! Process configuration loaded from file and environment.

use crate::error::ModerationResult;
use crate::settings::GuildSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Fixed low RMS threshold used while maintenance mode is on.
pub const DEFAULT_MAINTENANCE_THRESHOLD: f64 = 500.0;

/// Process-wide settings.
///
/// | Key / Env | Default | Description |
/// |-----------|---------|-------------|
/// | `app_name` / VOLGUARD__APP_NAME | Volguard | Name used in logs. |
/// | `storage_path` / VOLGUARD__STORAGE_PATH | ./data | Base directory for the sled store. |
/// | `maintenance_mode` / VOLGUARD__MAINTENANCE_MODE | false | Ignore guild sensitivity and use `maintenance_threshold`. |
/// | `maintenance_threshold` / VOLGUARD__MAINTENANCE_THRESHOLD | 500 | RMS threshold while in maintenance mode. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub app_name: String,
    pub storage_path: String,
    #[serde(default)]
    pub maintenance_mode: bool,
    #[serde(default = "default_maintenance_threshold")]
    pub maintenance_threshold: f64,
}

fn default_maintenance_threshold() -> f64 {
    DEFAULT_MAINTENANCE_THRESHOLD
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "Volguard".to_string(),
            storage_path: "./data".to_string(),
            maintenance_mode: false,
            maintenance_threshold: DEFAULT_MAINTENANCE_THRESHOLD,
        }
    }
}

impl AppConfig {
    /// Load config from file and environment. Precedence: env `VOLGUARD__*` > file
    /// (`VOLGUARD_CONFIG` path or `config/volguard`) > defaults.
    pub fn load() -> ModerationResult<Self> {
        let config_path =
            std::env::var("VOLGUARD_CONFIG").unwrap_or_else(|_| "config/volguard".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Same as [`AppConfig::load`] with an explicit file path; a missing file is skipped.
    pub fn load_from(path: &Path) -> ModerationResult<Self> {
        let defaults = Self::default();
        let builder = config::Config::builder()
            .set_default("app_name", defaults.app_name)?
            .set_default("storage_path", defaults.storage_path)?
            .set_default("maintenance_mode", defaults.maintenance_mode)?
            .set_default("maintenance_threshold", defaults.maintenance_threshold)?;

        let builder = builder.add_source(config::File::from(path).required(false));

        let built = builder
            .add_source(config::Environment::with_prefix("VOLGUARD").separator("__"))
            .build()?;

        Ok(built.try_deserialize()?)
    }

    /// Directory of the sled moderation store.
    pub fn store_path(&self) -> PathBuf {
        Path::new(&self.storage_path).join("volguard")
    }

    /// RMS threshold the voice monitor should use for a guild.
    pub fn monitor_threshold(&self, settings: &GuildSettings) -> f64 {
        if self.maintenance_mode {
            self.maintenance_threshold
        } else {
            settings.rms_threshold()
        }
    }
}
