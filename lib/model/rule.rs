//! Declarative replication rules: the unit of work the scheduler and engine consume.

use getset::{Getters, Setters};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::ReplicoreResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The exponential-backoff retry policy applied to transient failures during a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct RetryPolicy {
    /// Total attempts before giving up, including the first.
    #[builder(default = 5)]
    pub max_attempts: u32,
    /// The delay before the first retry, in milliseconds.
    #[builder(default = 200)]
    pub initial_delay_ms: u64,
    /// The maximum delay between retries, in milliseconds.
    #[builder(default = 10_000)]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::builder().build()
    }
}

/// Controls which tags a rule considers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct TagFilter {
    /// Tags matching any of these patterns are dropped first.
    #[builder(default)]
    pub exclude: Vec<String>,
    /// If non-empty, only tags matching at least one pattern survive.
    #[builder(default)]
    pub include: Vec<String>,
    /// If greater than zero, keep only the N most-recently-updated surviving tags.
    #[builder(default)]
    pub keep_latest: u32,
}

/// One side (source or target) of a replication rule's repository selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct RepositorySelector {
    /// The endpoint-local project (Harbor terminology; first path segment on plain v2).
    pub project: String,
    /// The repository within the project. `None` means "every repository in the project".
    #[builder(default, setter(strip_option))]
    pub repo: Option<String>,
}

/// A declarative instruction to mirror some set of tags from one registry to another.
#[derive(Debug, Clone, Getters, Setters, Serialize, Deserialize, TypedBuilder)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct ReplicationRule {
    /// A human-readable, unique rule identifier.
    id: String,
    /// A human-readable name, may repeat across rules.
    name: String,
    /// Where manifests and blobs are read from.
    source: RepositorySelector,
    /// Where manifests and blobs are written to.
    target: RepositorySelector,
    /// Which tags are considered.
    #[builder(default)]
    tag_filter: TagFilter,
    /// If non-empty, only manifest-index children matching one of these architectures
    /// (e.g. `amd64`, `arm64`) are copied.
    #[builder(default)]
    architectures: Vec<String>,
    /// A 5-field cron expression controlling scheduled runs. Empty means on-demand only.
    #[builder(default)]
    cron: String,
    /// Whether the scheduler considers this rule at all.
    #[builder(default = true)]
    enabled: bool,
    /// Overrides the process-wide default retry policy for this rule's copies.
    #[builder(default, setter(strip_option))]
    retry_policy: Option<RetryPolicy>,
    /// Overrides the process-wide default worker concurrency for this rule's copies.
    #[builder(default, setter(strip_option))]
    concurrency: Option<usize>,
    /// Opaque configuration for the (out-of-scope) notification fan-out, e.g. a
    /// webhook URL and event filter. The engine never interprets this; it is carried
    /// on the rule purely so the external notifier can read it back.
    #[builder(default, setter(strip_option))]
    notification_config: Option<serde_json::Value>,
}

impl ReplicationRule {
    /// Validates the rule, aggregating every problem found rather than stopping at
    /// the first, and returns a combined error if any were found.
    pub fn validate(&self) -> ReplicoreResult<()> {
        let mut problems = Vec::new();

        if self.id.trim().is_empty() {
            problems.push("id must not be empty".to_string());
        }
        if self.source.project.trim().is_empty() {
            problems.push("source.project must not be empty".to_string());
        }
        if self.target.project.trim().is_empty() {
            problems.push("target.project must not be empty".to_string());
        }
        for pattern in self.tag_filter.include.iter().chain(&self.tag_filter.exclude) {
            if let Err(e) = regex::Regex::new(pattern) {
                problems.push(format!("invalid tag filter pattern '{pattern}': {e}"));
            }
        }
        if !self.cron.is_empty() {
            if let Err(e) = crate::scheduler::parse_cron(&self.cron) {
                problems.push(format!("invalid cron expression '{}': {e}", self.cron));
            }
        }
        if let Some(policy) = &self.retry_policy {
            if policy.max_attempts == 0 {
                problems.push("retry_policy.max_attempts must be at least 1".to_string());
            }
        }
        if let Some(0) = self.concurrency {
            problems.push("concurrency must be at least 1".to_string());
        }
        if let Some(config) = &self.notification_config {
            if !config.is_object() {
                problems.push("notification_config must be a JSON object".to_string());
            }
        }

        match problems.len() {
            0 => crate::Ok(()),
            1 => Err(crate::ReplicoreError::ConfigValidation(
                problems.remove(0),
            )),
            _ => Err(crate::ReplicoreError::ConfigValidationErrors(problems)),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rule() -> ReplicationRule {
        ReplicationRule::builder()
            .id("mirror-nginx".into())
            .name("mirror nginx".into())
            .source(RepositorySelector::builder().project("library".into()).build())
            .target(RepositorySelector::builder().project("mirror".into()).build())
            .build()
    }

    #[test]
    fn test_valid_rule_passes() {
        assert!(sample_rule().validate().is_ok());
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut rule = sample_rule();
        rule.id = String::new();
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_aggregates_multiple_problems() {
        let mut rule = sample_rule();
        rule.id = String::new();
        rule.target.project = String::new();
        match rule.validate() {
            Err(crate::ReplicoreError::ConfigValidationErrors(problems)) => {
                assert_eq!(problems.len(), 2);
            }
            other => panic!("expected aggregated errors, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let mut rule = sample_rule();
        rule.tag_filter.include.push("(unclosed".into());
        assert!(rule.validate().is_err());
    }
}
