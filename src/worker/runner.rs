//! Task runner: pool when usable, inline otherwise.

use super::operation::{Operation, OperationOutput, ProgressCallback};
use super::pool::WorkerPool;
use super::WorkerConfig;
use crate::error::WorkerError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes operations on an optional [`WorkerPool`].
///
/// When the pool is absent, shut down, or loses the operation, the same
/// operation runs inline on the calling task. Operation failures are
/// returned as-is; re-running them inline would fail the same way.
#[derive(Clone, Default)]
pub struct TaskRunner {
    pool: Option<Arc<WorkerPool>>,
}

impl TaskRunner {
    /// Runner without a pool
    pub fn inline() -> Self {
        Self { pool: None }
    }

    pub fn with_pool(pool: Arc<WorkerPool>) -> Self {
        Self { pool: Some(pool) }
    }

    /// Build a pool when enabled and a runtime is available.
    pub fn from_config(config: &WorkerConfig) -> Self {
        if !config.enabled {
            return Self::inline();
        }
        match WorkerPool::new(config.clone()) {
            Ok(pool) => Self::with_pool(Arc::new(pool)),
            Err(e) => {
                debug!(error = %e, "Worker pool unavailable, running inline");
                Self::inline()
            }
        }
    }

    pub fn pool(&self) -> Option<&Arc<WorkerPool>> {
        self.pool.as_ref()
    }

    /// True when operations will run on the pool
    pub fn has_pool(&self) -> bool {
        self.pool.as_ref().map(|p| p.is_available()).unwrap_or(false)
    }

    pub async fn execute(
        &self,
        operation: Operation,
        progress: Option<ProgressCallback>,
    ) -> Result<OperationOutput, WorkerError> {
        if let Some(pool) = self.pool.as_ref().filter(|p| p.is_available()) {
            match pool.submit(operation.clone(), progress.clone()).await {
                Err(WorkerError::Unavailable(reason)) => {
                    warn!(operation = operation.name(), reason = %reason, "Pool unavailable, running inline");
                }
                Err(WorkerError::Cancelled) => {
                    warn!(operation = operation.name(), "Pool dropped operation, running inline");
                }
                other => return other,
            }
        }
        operation.execute(progress.as_ref())
    }

    /// Shut the pool down, if any. Later operations run inline.
    pub async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("pool", &self.pool.as_ref().map(|p| p.stats()))
            .finish()
    }
}
