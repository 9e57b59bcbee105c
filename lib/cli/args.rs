//! Command-line argument parsing for the `replicore` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::model::{RegistryEndpoint, ReplicationRule};

use super::styles;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A container image replication service: copies manifests and blobs between two
/// OCI/Docker-v2 registries per declarative rules, on demand or on a schedule.
#[derive(Debug, Parser)]
#[command(name = "replicore", author, version, styles = styles())]
pub struct ReplicoreArgs {
    /// The subcommand to run.
    #[command(subcommand)]
    pub subcommand: ReplicoreSubcommand,
}

/// The `replicore` subcommands.
#[derive(Debug, Subcommand)]
pub enum ReplicoreSubcommand {
    /// Runs a single rule synchronously against a JSON run spec, printing progress
    /// to stderr, then exits with the execution's final status.
    Run {
        /// Path to a JSON file containing a [`RunSpec`].
        spec_file: PathBuf,
    },

    /// Loads a JSON-serialized `ReplicationRule` and prints every validation
    /// problem found, without executing anything.
    Validate {
        /// Path to a JSON file containing a `ReplicationRule`.
        rule_file: PathBuf,
    },

    /// Starts the demonstration HTTP server (`ExecuteRule`/`CancelRule`/`Subscribe`
    /// bound to a handful of axum routes) and the cron-driven scheduler.
    Serve {
        /// Path to a TOML `GlobalConfig` file. Defaults are used for any field (or
        /// the whole file) that is absent.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// The JSON document `replicore run` consumes: a rule plus the two endpoints it
/// replicates between. Real deployments source these from the external management
/// plane; this shape exists purely so the one-shot CLI has something to load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    /// The rule to execute.
    pub rule: ReplicationRule,
    /// The endpoint manifests and blobs are read from.
    pub source: RegistryEndpoint,
    /// The endpoint manifests and blobs are written to.
    pub target: RegistryEndpoint,
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_validate_subcommand() {
        let args = ReplicoreArgs::parse_from(["replicore", "validate", "rule.json"]);
        match args.subcommand {
            ReplicoreSubcommand::Validate { rule_file } => assert_eq!(rule_file, PathBuf::from("rule.json")),
            other => panic!("expected Validate, got {other:?}"),
        }
    }

    #[test]
    fn test_parses_serve_subcommand_without_config() {
        let args = ReplicoreArgs::parse_from(["replicore", "serve"]);
        match args.subcommand {
            ReplicoreSubcommand::Serve { config } => assert!(config.is_none()),
            other => panic!("expected Serve, got {other:?}"),
        }
    }
}
