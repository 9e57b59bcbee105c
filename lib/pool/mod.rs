//! A bounded-concurrency worker pool with backpressure, used to run blob copy tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::ReplicoreResult;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A unit of work the pool can run.
#[async_trait]
pub trait PoolTask: Send + Sync {
    /// Runs the task, observing `cancel` at any suspension point.
    async fn execute(&self, cancel: CancellationToken) -> ReplicoreResult<()>;

    /// A short human-readable description, used in logs and error aggregation.
    fn description(&self) -> String;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A point-in-time snapshot of a pool's atomic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounters {
    /// Tasks accepted by `submit`.
    pub submitted: u64,
    /// Tasks that have finished, successfully or not.
    pub done: u64,
    /// Of `done`, how many returned an error.
    pub failed: u64,
}

struct Shared {
    submitted: AtomicU64,
    done: AtomicU64,
    failed: AtomicU64,
    cancel: CancellationToken,
    errors: Mutex<Vec<(String, crate::ReplicoreError)>>,
}

/// A bounded-concurrency pool. Tasks submitted beyond the queue depth block the
/// submitter until a slot frees up (backpressure rather than unbounded buffering).
pub struct WorkerPool {
    shared: Arc<Shared>,
    semaphore: Arc<Semaphore>,
    queue_tx: mpsc::Sender<()>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Creates a pool allowing up to `concurrency` tasks to run at once, with a
    /// submission queue of depth `2 * concurrency`.
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (queue_tx, _queue_rx) = mpsc::channel(2 * concurrency);
        WorkerPool {
            shared: Arc::new(Shared {
                submitted: AtomicU64::new(0),
                done: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                cancel: CancellationToken::new(),
                errors: Mutex::new(Vec::new()),
            }),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            queue_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Submits a task, blocking the caller if the queue is full. Spawns the task
    /// onto the runtime once a concurrency slot is available.
    pub async fn submit(&self, task: Arc<dyn PoolTask>) {
        // Reserve a queue slot; this is the backpressure mechanism (depth 2N).
        let permit = self.queue_tx.clone().reserve_owned().await;
        self.shared.submitted.fetch_add(1, Ordering::SeqCst);

        let semaphore = self.semaphore.clone();
        let shared = self.shared.clone();
        let cancel = self.shared.cancel.clone();

        let handle = tokio::spawn(async move {
            let _queue_permit = permit;
            let Ok(_concurrency_permit) = semaphore.acquire_owned().await else {
                return;
            };

            let description = task.description();
            let result = task.execute(cancel).await;
            shared.done.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = result {
                shared.failed.fetch_add(1, Ordering::SeqCst);
                shared.errors.lock().await.push((description, e));
            }
        });

        self.handles.lock().await.push(handle);
    }

    /// Seals the queue and waits for every in-flight task to finish. Returns the
    /// first error observed, if any; all errors remain available via [`Self::errors`].
    pub async fn wait(&self) -> Option<crate::ReplicoreError> {
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
        self.shared
            .errors
            .lock()
            .await
            .first()
            .map(|(_, e)| crate::ReplicoreError::custom(anyhow::anyhow!(e.to_string())))
    }

    /// Every error recorded by a failed task, paired with that task's description.
    pub async fn errors(&self) -> Vec<String> {
        self.shared
            .errors
            .lock()
            .await
            .iter()
            .map(|(description, e)| format!("{description}: {e}"))
            .collect()
    }

    /// Requests cancellation of the pool's cancellation token; in-flight tasks are
    /// expected to observe it at their next suspension point and exit promptly.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
    }

    /// A snapshot of the pool's counters, safe to call concurrently with `submit`.
    pub fn counters(&self) -> PoolCounters {
        PoolCounters {
            submitted: self.shared.submitted.load(Ordering::SeqCst),
            done: self.shared.done.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
        }
    }

    /// The cancellation token tasks should observe; shared with [`Self::stop`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    struct CountingTask {
        counter: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl PoolTask for CountingTask {
        async fn execute(&self, _cancel: CancellationToken) -> ReplicoreResult<()> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(crate::ReplicoreError::custom(anyhow::anyhow!("boom")))
            } else {
                crate::Ok(())
            }
        }

        fn description(&self) -> String {
            "counting task".to_string()
        }
    }

    #[tokio::test]
    async fn test_all_tasks_run() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..20 {
            pool.submit(Arc::new(CountingTask { counter: counter.clone(), fail: false }))
                .await;
        }
        pool.wait().await;

        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert_eq!(pool.counters().done, 20);
        assert_eq!(pool.counters().failed, 0);
    }

    #[tokio::test]
    async fn test_failures_do_not_cancel_sibling_tasks() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicU32::new(0));

        for i in 0..10 {
            pool.submit(Arc::new(CountingTask { counter: counter.clone(), fail: i % 3 == 0 }))
                .await;
        }
        pool.wait().await;

        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.counters().failed, 4);
        assert_eq!(pool.errors().await.len(), 4);
    }

    #[tokio::test]
    async fn test_stop_sets_cancellation_token() {
        let pool = WorkerPool::new(1);
        let token = pool.cancellation_token();
        assert!(!token.is_cancelled());
        pool.stop();
        assert!(token.is_cancelled());
    }
}
