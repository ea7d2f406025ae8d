//! Global config file source: $XDG_CONFIG_HOME/canopy/config.toml

use crate::config::paths::xdg_root;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File};

/// Add the global config file to builder when it exists.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    match xdg_root::global_config_path() {
        Ok(path) if path.exists() => Ok(builder.add_source(File::from(path).required(false))),
        _ => Ok(builder),
    }
}
