//! The execution tracker: the persistence- and progress-facing half of the
//! scheduler, responsible for an execution's record, its append-only log, and the
//! fan-out of [`ProgressEvent`]s to subscribers.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;

use crate::model::{ExecutionCounters, ExecutionLogEntry, ExecutionStatus, LogLevel, ProgressEvent};
use crate::ReplicoreResult;

use super::store::ExecutionStore;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Wraps an [`ExecutionStore`] with the progress fan-out and the small set of
/// write operations the scheduler performs against one execution as it runs.
pub struct ExecutionTracker {
    store: Arc<dyn ExecutionStore>,
    progress_tx: broadcast::Sender<ProgressEvent>,
    log_tx: broadcast::Sender<ExecutionLogEntry>,
}

impl ExecutionTracker {
    /// Builds a tracker backed by `store`, with a progress channel of the given
    /// capacity (subscribers that fall behind drop events rather than block senders).
    pub fn new(store: Arc<dyn ExecutionStore>, channel_capacity: usize) -> Self {
        let (progress_tx, _) = broadcast::channel(channel_capacity);
        let (log_tx, _) = broadcast::channel(channel_capacity);
        ExecutionTracker { store, progress_tx, log_tx }
    }

    /// A new receiver for the progress fan-out.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    /// A sender collaborators (the engine) can forward per-execution progress
    /// events into; the tracker relays everything it receives to all subscribers.
    pub fn sender(&self) -> broadcast::Sender<ProgressEvent> {
        self.progress_tx.clone()
    }

    /// Persists a new execution record.
    pub async fn create(&self, execution: &crate::model::Execution) -> ReplicoreResult<()> {
        self.store.create_execution(execution).await
    }

    /// Transitions an execution's status, optionally recording an end time and
    /// error summary. Terminal statuses are write-once at the store layer.
    pub async fn set_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error_summary: Option<String>,
        ended_at: Option<chrono::DateTime<Utc>>,
    ) -> ReplicoreResult<()> {
        self.store.set_status(execution_id, status, error_summary, ended_at).await
    }

    /// Overwrites an execution's counters snapshot.
    pub async fn update_counters(&self, execution_id: &str, counters: ExecutionCounters) -> ReplicoreResult<()> {
        self.store.update_counters(execution_id, counters).await
    }

    /// Appends one line to an execution's persisted, append-only log and relays it
    /// to anyone currently following that execution via [`Self::follow_log`].
    pub async fn log(&self, execution_id: &str, level: LogLevel, message: impl Into<String>) -> ReplicoreResult<()> {
        let entry = ExecutionLogEntry {
            execution_id: execution_id.to_string(),
            level,
            timestamp: Utc::now(),
            message: message.into(),
        };
        self.store.append_log(&entry).await?;
        let _ = self.log_tx.send(entry);
        crate::Ok(())
    }

    /// Returns every log entry recorded for `execution_id`, in insertion order.
    pub async fn tail_log(&self, execution_id: &str) -> ReplicoreResult<Vec<ExecutionLogEntry>> {
        self.store.read_log(execution_id).await
    }

    /// Streams log entries for `execution_id`: the already-recorded backlog first,
    /// then every entry appended afterward. Intended for a log viewer joining a run
    /// already in flight.
    pub async fn follow_log(&self, execution_id: &str) -> ReplicoreResult<tokio::sync::mpsc::Receiver<ExecutionLogEntry>> {
        let (tx, rx) = tokio::sync::mpsc::channel(256);

        // Subscribe before reading the backlog: an entry appended between the two
        // would otherwise fall in the gap, postdating the snapshot but predating the
        // subscription. Subscribing first means such an entry lands in both the
        // backlog and the live buffer, so the live loop below dedupes against the
        // backlog before forwarding.
        let mut live = self.log_tx.subscribe();
        let backlog = self.store.read_log(execution_id).await?;
        let execution_id = execution_id.to_string();

        tokio::spawn(async move {
            for entry in &backlog {
                if tx.send(entry.clone()).await.is_err() {
                    return;
                }
            }
            loop {
                match live.recv().await {
                    Ok(entry) if entry.execution_id == execution_id => {
                        if backlog.contains(&entry) {
                            continue;
                        }
                        if tx.send(entry).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        crate::Ok(rx)
    }
}
