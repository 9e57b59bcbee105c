//! The scheduler: turns rule definitions into concrete executions, enforces
//! at-most-one-in-flight per rule, drives cron-triggered runs, and delegates
//! persistence and progress fan-out to the [`ExecutionTracker`].

mod store;
mod tracker;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::ReplicationEngine;
use crate::model::{
    Execution, ExecutionStatus, LogLevel, ProgressEvent, ProgressPhase, RegistryEndpoint,
    ReplicationRule,
};
use crate::registry::RegistryClient;
use crate::{ReplicoreError, ReplicoreResult};

pub use store::{ExecutionStore, SqliteExecutionStore};
pub use tracker::ExecutionTracker;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a standard 5-field cron expression (minute hour day-of-month month
/// day-of-week). An empty expression means "on demand only" and is rejected here;
/// callers should check for emptiness before calling.
pub fn parse_cron(expr: &str) -> ReplicoreResult<cron::Schedule> {
    // The `cron` crate's grammar is seconds-first; prepend a literal "0" seconds
    // field so rule authors can keep writing standard 5-field expressions.
    let with_seconds = format!("0 {expr}");
    with_seconds
        .parse::<cron::Schedule>()
        .map_err(|e| ReplicoreError::Cron(e.to_string()))
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

struct InFlight {
    cancel: CancellationToken,
    execution_id: String,
}

/// The long-lived scheduler: holds the in-flight map and the execution tracker,
/// and exposes the `ExecuteRule`/`CancelRule`/`Subscribe` boundary.
pub struct Scheduler {
    tracker: ExecutionTracker,
    in_flight: Mutex<HashMap<String, InFlight>>,
    global_concurrency: usize,
}

impl Scheduler {
    /// Builds a scheduler backed by `store`, with `global_concurrency` as the
    /// default worker pool size for rules that don't override it.
    pub fn new(store: Arc<dyn ExecutionStore>, global_concurrency: usize) -> Self {
        Scheduler {
            tracker: ExecutionTracker::new(store, 1024),
            in_flight: Mutex::new(HashMap::new()),
            global_concurrency,
        }
    }

    /// Subscribes to the progress event fan-out. Slow consumers drop events rather
    /// than backpressure the engine (bounded channel).
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tracker.subscribe()
    }

    /// Starts a run of `rule` if it is not already in flight, returning the new
    /// execution's id immediately; the run itself proceeds on a background task.
    pub async fn execute_rule(
        self: &Arc<Self>,
        rule: ReplicationRule,
        source: RegistryEndpoint,
        target: RegistryEndpoint,
    ) -> ReplicoreResult<String> {
        rule.validate()?;

        let mut in_flight = self.in_flight.lock().await;
        if in_flight.contains_key(rule.get_id()) {
            return Err(ReplicoreError::Conflict(rule.get_id().clone()));
        }

        let execution_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        in_flight.insert(
            rule.get_id().clone(),
            InFlight { cancel: cancel.clone(), execution_id: execution_id.clone() },
        );
        drop(in_flight);

        let execution = Execution::new(execution_id.clone(), rule.get_id().clone(), Utc::now());
        self.tracker.create(&execution).await?;
        self.tracker
            .log(&execution_id, LogLevel::Info, format!("execution started for rule '{}'", rule.get_name()))
            .await?;

        let scheduler = self.clone();
        let execution_id_for_task = execution_id.clone();
        tokio::spawn(async move {
            scheduler
                .drive_execution(rule, source, target, execution_id_for_task, cancel)
                .await;
        });

        crate::Ok(execution_id)
    }

    async fn drive_execution(
        self: Arc<Self>,
        rule: ReplicationRule,
        source: RegistryEndpoint,
        target: RegistryEndpoint,
        execution_id: String,
        cancel: CancellationToken,
    ) {
        self.tracker.set_status(&execution_id, ExecutionStatus::Running, None, None).await.ok();

        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel(256);
        let broadcast_tx = self.tracker.sender();
        let forward_task = tokio::spawn(async move {
            while let Some(event) = progress_rx.recv().await {
                let _ = broadcast_tx.send(event);
            }
        });

        let run_result = self.run_engine(&rule, &source, &target, &execution_id, progress_tx.clone(), cancel.clone()).await;
        drop(progress_tx);
        let _ = forward_task.await;

        let (status, summary) = match run_result {
            Ok(outcome) => {
                // Persist whatever progress was actually made, even on a terminal
                // outcome other than success, so a canceled or failed execution's
                // counters row reflects real partial work rather than the all-zero
                // state `Execution::new` started with.
                self.tracker.update_counters(&execution_id, outcome.counters).await.ok();

                if outcome.canceled {
                    (ExecutionStatus::Canceled, None)
                } else if outcome.preflight_error.is_some() {
                    (ExecutionStatus::Failed, outcome.preflight_error)
                } else if !outcome.errors.is_empty() || outcome.counters.failed_blobs > 0 {
                    (ExecutionStatus::Failed, Some(outcome.errors.join("; ")))
                } else {
                    (ExecutionStatus::Success, None)
                }
            }
            Err(e) => (ExecutionStatus::Failed, Some(e.to_string())),
        };

        self.tracker.set_status(&execution_id, status, summary.clone(), Some(Utc::now())).await.ok();
        self.tracker
            .log(
                &execution_id,
                if status == ExecutionStatus::Success { LogLevel::Info } else { LogLevel::Error },
                summary.unwrap_or_else(|| format!("execution reached {status:?}")),
            )
            .await
            .ok();

        self.in_flight.lock().await.remove(rule.get_id());
    }

    async fn run_engine(
        &self,
        rule: &ReplicationRule,
        source: &RegistryEndpoint,
        target: &RegistryEndpoint,
        execution_id: &str,
        progress_tx: tokio::sync::mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> ReplicoreResult<crate::engine::EngineOutcome> {
        let source_client = Arc::new(RegistryClient::new(source.clone())?);
        let target_client = Arc::new(RegistryClient::new(target.clone())?);
        let engine = ReplicationEngine::new(source_client, target_client, progress_tx);
        engine.run(rule, execution_id, self.global_concurrency, cancel).await
    }

    /// Flips the cancel handle for `rule_id`'s in-flight execution, if any.
    /// No-ops (successfully) if the rule has no execution in flight.
    pub async fn cancel_rule(&self, rule_id: &str) -> ReplicoreResult<()> {
        if let Some(entry) = self.in_flight.lock().await.get(rule_id) {
            entry.cancel.cancel();
        }
        crate::Ok(())
    }

    /// Returns the execution id currently in flight for `rule_id`, if any.
    pub async fn in_flight_execution(&self, rule_id: &str) -> Option<String> {
        self.in_flight.lock().await.get(rule_id).map(|e| e.execution_id.clone())
    }

    /// Returns the append-only log for `execution_id` in insertion order.
    pub async fn tail_log(&self, execution_id: &str) -> ReplicoreResult<Vec<crate::model::ExecutionLogEntry>> {
        self.tracker.tail_log(execution_id).await
    }

    /// Streams the append-only log for `execution_id`, backlog followed by live
    /// entries, for a log viewer joining a run already underway.
    pub async fn follow_log(&self, execution_id: &str) -> ReplicoreResult<tokio::sync::mpsc::Receiver<crate::model::ExecutionLogEntry>> {
        self.tracker.follow_log(execution_id).await
    }

    /// A snapshot of the emitted progress phase counts, used by tests and the
    /// one-shot CLI to know when an execution has quiesced.
    pub fn progress_phase_name(phase: ProgressPhase) -> &'static str {
        match phase {
            ProgressPhase::Manifest => "manifest",
            ProgressPhase::Blob => "blob",
            ProgressPhase::Complete => "complete",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cron_accepts_standard_5_field() {
        assert!(parse_cron("0 3 * * *").is_ok());
        assert!(parse_cron("*/15 * * * *").is_ok());
    }

    #[test]
    fn test_parse_cron_rejects_garbage() {
        assert!(parse_cron("not a cron expression").is_err());
    }
}
