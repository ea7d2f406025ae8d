//! MergeService: orchestrates sources, applies merge policy, deserializes to CanopyConfig.

use crate::config::sources::{environment, global_file, workspace_file};
use crate::config::CanopyConfig;
use config::ConfigError;
use std::path::Path;
use tracing::debug;

use super::merge_policy;

/// Merge service for config composition.
pub struct MergeService;

impl MergeService {
    /// Load config from workspace and standard sources.
    /// Precedence: defaults (lowest) -> global file -> workspace file -> environment (highest).
    pub fn load(workspace_root: &Path) -> Result<CanopyConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = environment::add_to_builder(builder)?;

        let config: CanopyConfig = builder.build()?.try_deserialize()?;
        Self::checked(config)
    }

    /// Load config from a specific file with environment overlay.
    pub fn load_from_file(path: &Path) -> Result<CanopyConfig, ConfigError> {
        use config::File;

        let builder = merge_policy::builder_with_defaults()?;
        let builder = builder.add_source(File::from(path).required(true));
        let builder = environment::add_to_builder(builder)?;

        let config: CanopyConfig = builder.build()?.try_deserialize()?;
        Self::checked(config)
    }

    fn checked(config: CanopyConfig) -> Result<CanopyConfig, ConfigError> {
        config.validate().map_err(ConfigError::Message)?;
        debug!(
            chunk_size = config.loader.chunk_size,
            max_loaded_items = config.loader.max_loaded_items,
            "Configuration loaded"
        );
        Ok(config)
    }
}
