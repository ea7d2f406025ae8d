//! Environment variable source: CANOPY_* prefix with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// Prefix for configuration environment variables
pub const ENV_PREFIX: &str = "CANOPY";

/// Add environment variable overlay to builder.
/// `CANOPY__LOADER__CHUNK_SIZE=25` sets `loader.chunk_size`.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );
    Ok(builder)
}
