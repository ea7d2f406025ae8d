//! Merge policy: the defaults layer every builder starts from.

use crate::config::CanopyConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat};

/// Builder seeded with the serialized built-in defaults.
///
/// Later sources override individual keys, so a file that only sets
/// `loader.chunk_size` keeps every other default.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = CanopyConfig::default()
        .to_toml()
        .map_err(|e| ConfigError::Message(format!("Failed to render defaults: {}", e)))?;
    Ok(Config::builder().add_source(File::from_str(&defaults, FileFormat::Toml)))
}
