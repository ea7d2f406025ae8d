//! Background Execution
//!
//! CPU-heavy steps (search scoring, subtree assembly, path recomputation) run
//! as stateless request/response operations. A [`WorkerPool`] is constructed
//! explicitly and owned by whoever needs it; [`TaskRunner`] falls back to
//! running the operation inline when no pool is usable.

pub mod operation;
pub mod pool;
pub mod runner;

pub use operation::{Operation, OperationOutput, Progress, ProgressCallback};
pub use pool::{PoolStats, WorkerPool};
pub use runner::TaskRunner;

use serde::{Deserialize, Serialize};

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Use a pool at all; false runs every operation inline
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Upper bound on concurrently live workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// A worker without work for this long exits
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_max_workers() -> usize {
    2
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_workers: default_max_workers(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.max_workers == 0 {
            return Err("worker.max_workers must be greater than zero when enabled".to_string());
        }
        Ok(())
    }
}
