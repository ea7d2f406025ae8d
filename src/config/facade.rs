//! ConfigLoader facade delegating to merge service.

use super::merge::service::MergeService;
use super::paths::xdg_root;
use super::CanopyConfig;
use config::ConfigError;
use std::path::{Path, PathBuf};

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Path of the global config file ($XDG_CONFIG_HOME/canopy/config.toml)
    pub fn global_config_path() -> Option<PathBuf> {
        xdg_root::global_config_path().ok()
    }

    /// Load configuration from files and environment.
    pub fn load(workspace_root: &Path) -> Result<CanopyConfig, ConfigError> {
        MergeService::load(workspace_root)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<CanopyConfig, ConfigError> {
        MergeService::load_from_file(path)
    }

    /// Create default configuration.
    pub fn default() -> CanopyConfig {
        CanopyConfig::default()
    }
}
