//! Worker pool with explicit lifecycle.
//!
//! Workers are spawned lazily up to `max_workers`, exit on their own after
//! `idle_timeout_ms` without work, and are all torn down by
//! [`WorkerPool::shutdown`]. Each operation runs on the blocking thread pool.

use super::operation::{Operation, OperationOutput, ProgressCallback};
use super::WorkerConfig;
use crate::error::WorkerError;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Task {
    operation: Operation,
    progress: Option<ProgressCallback>,
    reply: oneshot::Sender<Result<OperationOutput, WorkerError>>,
}

/// Queue plus worker bookkeeping; one lock so spawn and exit decisions agree.
#[derive(Default)]
struct PoolQueue {
    tasks: VecDeque<Task>,
    live: usize,
    idle: usize,
    completed: usize,
    failed: usize,
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub live_workers: usize,
    pub idle_workers: usize,
    pub queued: usize,
    pub completed: usize,
    pub failed: usize,
}

struct PoolShared {
    config: WorkerConfig,
    queue: Mutex<PoolQueue>,
    notify: Notify,
    shutdown: CancellationToken,
}

/// Explicitly constructed worker pool.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    runtime: Handle,
}

impl WorkerPool {
    /// Create a pool on the current Tokio runtime. No worker starts until
    /// the first submission.
    pub fn new(config: WorkerConfig) -> Result<Self, WorkerError> {
        if config.max_workers == 0 {
            return Err(WorkerError::Unavailable(
                "max_workers is zero".to_string(),
            ));
        }
        let runtime = Handle::try_current()
            .map_err(|e| WorkerError::Unavailable(format!("no async runtime: {}", e)))?;
        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                queue: Mutex::new(PoolQueue::default()),
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
            handles: Mutex::new(Vec::new()),
            runtime,
        })
    }

    pub fn is_available(&self) -> bool {
        !self.shared.shutdown.is_cancelled()
    }

    pub fn stats(&self) -> PoolStats {
        let queue = self.shared.queue.lock();
        PoolStats {
            live_workers: queue.live,
            idle_workers: queue.idle,
            queued: queue.tasks.len(),
            completed: queue.completed,
            failed: queue.failed,
        }
    }

    /// Queue `operation` and wait for its result.
    pub async fn submit(
        &self,
        operation: Operation,
        progress: Option<ProgressCallback>,
    ) -> Result<OperationOutput, WorkerError> {
        if !self.is_available() {
            return Err(WorkerError::Unavailable("pool is shut down".to_string()));
        }
        let (reply, response) = oneshot::channel();
        let name = operation.name();
        let spawn = {
            let mut queue = self.shared.queue.lock();
            queue.tasks.push_back(Task {
                operation,
                progress,
                reply,
            });
            let waiting = queue.tasks.len();
            if queue.idle < waiting && queue.live < self.shared.config.max_workers {
                queue.live += 1;
                true
            } else {
                false
            }
        };
        if spawn {
            self.spawn_worker();
        }
        self.shared.notify.notify_one();
        debug!(operation = name, "Operation submitted");

        response.await.map_err(|_| WorkerError::Cancelled)?
    }

    fn spawn_worker(&self) {
        let shared = Arc::clone(&self.shared);
        let handle = self.runtime.spawn(worker_loop(shared));
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        debug!(workers = handles.len(), "Worker spawned");
    }

    /// Stop every worker and drop queued work. Pending submitters receive
    /// [`WorkerError::Cancelled`]. The pool cannot be restarted.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.queue.lock().tasks.clear();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        let count = handles.len();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Worker ended abnormally");
            }
        }
        info!(workers = count, "Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn worker_loop(shared: Arc<PoolShared>) {
    let idle_timeout = Duration::from_millis(shared.config.idle_timeout_ms);
    loop {
        if shared.shutdown.is_cancelled() {
            shared.queue.lock().live -= 1;
            return;
        }

        let task = {
            let mut queue = shared.queue.lock();
            let task = queue.tasks.pop_front();
            if task.is_none() {
                queue.idle += 1;
            }
            task
        };

        let Some(task) = task else {
            let timed_out = tokio::select! {
                _ = shared.notify.notified() => false,
                _ = sleep(idle_timeout) => true,
                _ = shared.shutdown.cancelled() => true,
            };
            let mut queue = shared.queue.lock();
            queue.idle -= 1;
            if timed_out && (queue.tasks.is_empty() || shared.shutdown.is_cancelled()) {
                queue.live -= 1;
                debug!(live = queue.live, "Idle worker exiting");
                return;
            }
            continue;
        };

        let name = task.operation.name();
        let Task {
            operation,
            progress,
            reply,
        } = task;
        let result = tokio::task::spawn_blocking(move || operation.execute(progress.as_ref()))
            .await
            .unwrap_or_else(|e| {
                Err(WorkerError::Failed {
                    operation: name.to_string(),
                    reason: e.to_string(),
                })
            });

        {
            let mut queue = shared.queue.lock();
            if result.is_ok() {
                queue.completed += 1;
            } else {
                queue.failed += 1;
            }
        }
        // submitter may have given up
        let _ = reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, Record};

    fn search_op(n: usize) -> Operation {
        Operation::ScoreSearch {
            query: "node".to_string(),
            fields: vec![Field::Attribute("name".to_string())],
            records: (0..n)
                .map(|i| Arc::new(Record::new(i.to_string()).with_attribute("name", format!("node {}", i))))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_pool_spawns_lazily_and_executes() {
        let pool = WorkerPool::new(WorkerConfig::default()).unwrap();
        assert_eq!(pool.stats().live_workers, 0);

        let output = pool.submit(search_op(10), None).await.unwrap();
        match output {
            OperationOutput::Scores(scores) => assert_eq!(scores.len(), 10),
            other => panic!("unexpected output {:?}", other),
        }
        let stats = pool.stats();
        assert_eq!(stats.live_workers, 1);
        assert_eq!(stats.completed, 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_submissions_respect_max_workers() {
        let pool = Arc::new(WorkerPool::new(WorkerConfig::default()).unwrap());
        let jobs = (0..6).map(|_| {
            let pool = Arc::clone(&pool);
            async move { pool.submit(search_op(50), None).await }
        });
        for result in join_all(jobs).await {
            assert!(result.is_ok());
        }
        let stats = pool.stats();
        assert!(stats.live_workers <= 2);
        assert_eq!(stats.completed, 6);
        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_worker_exits_after_timeout() {
        let config = WorkerConfig {
            idle_timeout_ms: 1_000,
            ..WorkerConfig::default()
        };
        let pool = WorkerPool::new(config).unwrap();
        pool.submit(search_op(1), None).await.unwrap();
        assert_eq!(pool.stats().live_workers, 1);

        sleep(Duration::from_millis(1_500)).await;
        assert_eq!(pool.stats().live_workers, 0);

        // a later submission starts a fresh worker
        pool.submit(search_op(1), None).await.unwrap();
        assert_eq!(pool.stats().completed, 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let pool = WorkerPool::new(WorkerConfig::default()).unwrap();
        pool.submit(search_op(1), None).await.unwrap();
        pool.shutdown().await;

        assert!(!pool.is_available());
        assert_eq!(pool.stats().live_workers, 0);
        assert!(matches!(
            pool.submit(search_op(1), None).await,
            Err(WorkerError::Unavailable(_))
        ));
    }

    #[test]
    fn test_new_requires_runtime() {
        assert!(matches!(
            WorkerPool::new(WorkerConfig::default()),
            Err(WorkerError::Unavailable(_))
        ));
    }
}
