//! Loader configuration

use serde::{Deserialize, Serialize};

/// Tunables of the viewport-driven chunk loader.
///
/// The screen multipliers are heuristics, not algorithmic constants; tune them
/// against the latency and memory budget of the deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Records per fetch unit
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Viewports to prefetch on each side of the visible range
    #[serde(default = "default_load_ahead_factor")]
    pub load_ahead_factor: f64,

    /// Viewports beyond which loaded chunks become evictable
    #[serde(default = "default_unload_threshold")]
    pub unload_threshold: f64,

    /// Ceiling on resident records that triggers eviction
    #[serde(default = "default_max_loaded_items")]
    pub max_loaded_items: usize,

    /// Capacity of the chunk-result cache; 0 disables it
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Quiet period after the last viewport update before fetching
    #[serde(default = "default_debounce_delay_ms")]
    pub debounce_delay_ms: u64,

    /// Records fetched by `load_initial`
    #[serde(default = "default_initial_load_size")]
    pub initial_load_size: usize,

    /// Keep chunks holding ancestors of visible records resident
    #[serde(default = "default_pin_ancestors")]
    pub pin_ancestors: bool,

    /// Samples in the rolling latency average
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
}

fn default_chunk_size() -> usize {
    50
}

fn default_load_ahead_factor() -> f64 {
    1.0
}

fn default_unload_threshold() -> f64 {
    3.0
}

fn default_max_loaded_items() -> usize {
    1000
}

fn default_cache_size() -> usize {
    10
}

fn default_debounce_delay_ms() -> u64 {
    100
}

fn default_initial_load_size() -> usize {
    100
}

fn default_pin_ancestors() -> bool {
    true
}

fn default_latency_window() -> usize {
    10
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            load_ahead_factor: default_load_ahead_factor(),
            unload_threshold: default_unload_threshold(),
            max_loaded_items: default_max_loaded_items(),
            cache_size: default_cache_size(),
            debounce_delay_ms: default_debounce_delay_ms(),
            initial_load_size: default_initial_load_size(),
            pin_ancestors: default_pin_ancestors(),
            latency_window: default_latency_window(),
        }
    }
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("loader.chunk_size must be greater than zero".to_string());
        }
        if !self.load_ahead_factor.is_finite() || self.load_ahead_factor < 0.0 {
            return Err(format!(
                "loader.load_ahead_factor must be a non-negative number, got {}",
                self.load_ahead_factor
            ));
        }
        if !self.unload_threshold.is_finite() || self.unload_threshold < 0.0 {
            return Err(format!(
                "loader.unload_threshold must be a non-negative number, got {}",
                self.unload_threshold
            ));
        }
        if self.max_loaded_items < self.chunk_size {
            return Err(format!(
                "loader.max_loaded_items ({}) must be at least loader.chunk_size ({})",
                self.max_loaded_items, self.chunk_size
            ));
        }
        if self.latency_window == 0 {
            return Err("loader.latency_window must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Index of the chunk containing `index`
    pub fn chunk_index(&self, index: usize) -> usize {
        index / self.chunk_size
    }

    /// Half-open range covered by chunk `chunk`, clamped to `total`
    pub fn chunk_range(&self, chunk: usize, total: usize) -> (usize, usize) {
        let start = chunk * self.chunk_size;
        (start, (start + self.chunk_size).min(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_defaults() {
        assert!(LoaderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = LoaderConfig::default();
        config.chunk_size = 0;
        assert!(config.validate().unwrap_err().contains("chunk_size"));

        let mut config = LoaderConfig::default();
        config.load_ahead_factor = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = LoaderConfig::default();
        config.unload_threshold = -1.0;
        assert!(config.validate().is_err());

        let mut config = LoaderConfig::default();
        config.max_loaded_items = 10;
        assert!(config.validate().unwrap_err().contains("max_loaded_items"));

        let mut config = LoaderConfig::default();
        config.cache_size = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_chunk_arithmetic() {
        let config = LoaderConfig::default();
        assert_eq!(config.chunk_index(0), 0);
        assert_eq!(config.chunk_index(49), 0);
        assert_eq!(config.chunk_index(50), 1);
        assert_eq!(config.chunk_range(1, 1000), (50, 100));
        assert_eq!(config.chunk_range(2, 120), (100, 120));
    }
}
