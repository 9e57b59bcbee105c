//! Execution records, progress events, and the append-only per-execution log.

use chrono::{DateTime, Utc};
use getset::{Getters, Setters};
use serde::{Deserialize, Serialize};

use super::Descriptor;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The lifecycle state of an [`Execution`]. `Success`, `Failed`, and `Canceled` are
/// terminal; once reached, the record is written once and never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created but not yet picked up by a worker.
    Pending,
    /// Actively copying blobs or pushing manifests.
    Running,
    /// Completed with zero blob or manifest failures.
    Success,
    /// Completed with at least one blob or manifest failure, or a terminal preflight error.
    Failed,
    /// Stopped in response to a `CancelRule` call.
    Canceled,
}

impl ExecutionStatus {
    /// True once the status will never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Canceled
        )
    }
}

/// Monotonically non-decreasing counters tracked for one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounters {
    /// The total number of distinct blobs the plan identified.
    pub total_blobs: u64,
    /// Blobs confirmed present on the target (via copy, mount, or pre-existence).
    pub synced_blobs: u64,
    /// Of `synced_blobs`, how many were already present and required no transfer.
    pub skipped_blobs: u64,
    /// Blobs that failed after exhausting retries.
    pub failed_blobs: u64,
    /// Bytes actually transferred (excludes skipped/mounted blobs).
    pub bytes_synced: u64,
}

/// One run of one [`crate::model::ReplicationRule`].
#[derive(Debug, Clone, Getters, Setters, Serialize, Deserialize)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct Execution {
    /// A unique identifier for this run.
    id: String,
    /// The rule this run executes.
    rule_id: String,
    /// The current lifecycle state.
    status: ExecutionStatus,
    /// When the run was created.
    started_at: DateTime<Utc>,
    /// When the run reached a terminal state, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ended_at: Option<DateTime<Utc>>,
    /// Progress counters, updated as the run proceeds.
    counters: ExecutionCounters,
    /// A human-readable summary of what went wrong, set only on terminal failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_summary: Option<String>,
}

impl Execution {
    /// Creates a new execution in `Pending` status for the given rule.
    pub fn new(id: impl Into<String>, rule_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Execution {
            id: id.into(),
            rule_id: rule_id.into(),
            status: ExecutionStatus::Pending,
            started_at,
            ended_at: None,
            counters: ExecutionCounters::default(),
            error_summary: None,
        }
    }

    /// Transitions to a terminal state, recording the end time and optional summary.
    /// No-ops if already terminal, since terminal records are write-once.
    pub fn finish(&mut self, status: ExecutionStatus, ended_at: DateTime<Utc>, error_summary: Option<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.ended_at = Some(ended_at);
        self.error_summary = error_summary;
    }
}

/// The phase of a [`ProgressEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    /// Enumerating or pushing manifests.
    Manifest,
    /// Copying blobs.
    Blob,
    /// The execution has reached a terminal state.
    Complete,
}

/// A snapshot of one execution's progress, emitted to the `Subscribe()` fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The execution this event describes.
    pub execution_id: String,
    /// Which phase of the run produced this event.
    pub phase: ProgressPhase,
    /// The counters as of this event.
    pub counters: ExecutionCounters,
    /// The descriptor currently being handled, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,
}

/// The severity of an [`ExecutionLogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Fine-grained diagnostic detail.
    Debug,
    /// Routine progress narration.
    Info,
    /// A recoverable problem was encountered.
    Warn,
    /// An unrecoverable problem for the affected unit of work.
    Error,
}

/// One line of an execution's append-only, persisted log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// The execution this entry belongs to.
    pub execution_id: String,
    /// The entry's severity.
    pub level: LogLevel,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// The human-readable log message.
    pub message: String,
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_is_write_once() {
        let mut execution = Execution::new("e1", "r1", Utc::now());
        let first_end = Utc::now();
        execution.finish(ExecutionStatus::Success, first_end, None);
        execution.finish(ExecutionStatus::Failed, Utc::now(), Some("late".into()));

        assert_eq!(*execution.get_status(), ExecutionStatus::Success);
        assert_eq!(*execution.get_ended_at(), Some(first_end));
        assert!(execution.get_error_summary().is_none());
    }

    #[test]
    fn test_terminal_states() {
        assert!(ExecutionStatus::Success.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Canceled.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }
}
