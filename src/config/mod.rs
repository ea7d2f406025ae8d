//! Configuration
//!
//! `CanopyConfig` gathers every tunable of the loader, the filter orchestrator,
//! the hierarchy model and the background runner. Sources are merged by
//! [`MergeService`] in ascending precedence: built-in defaults, the global
//! file, the workspace file, then `CANOPY__*` environment variables.

pub mod facade;
pub mod merge;
pub mod paths;
pub mod sources;

pub use facade::ConfigLoader;
pub use merge::service::MergeService;

use crate::filter::FilterConfig;
use crate::hierarchy::HierarchyConfig;
use crate::loader::LoaderConfig;
use crate::logging::LoggingConfig;
use crate::worker::WorkerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Workspace config file name
pub const WORKSPACE_CONFIG_FILE: &str = "canopy.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanopyConfig {
    #[serde(default)]
    pub loader: LoaderConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub hierarchy: HierarchyConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CanopyConfig {
    /// Validate every section, reporting the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.loader.validate()?;
        self.worker.validate()?;
        if self.filter.search_fields.is_empty() {
            return Err("filter.search_fields must name at least one field".to_string());
        }
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// A non-fatal configuration problem detected at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigWarning {
    /// Dotted config key the warning concerns
    pub key: String,
    pub message: String,
}

impl ConfigWarning {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}
