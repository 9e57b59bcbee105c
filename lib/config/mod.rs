//! Process-level configuration: the core binary's own ambient settings, distinct
//! from rule definitions (owned by the external management plane).

mod defaults;
mod validate;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::ReplicoreResult;

pub use defaults::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Process-wide settings the core binary loads once at startup. Every field has a
/// documented default so the process runs with zero configuration.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct GlobalConfig {
    /// The default worker pool size for rules that don't set their own `concurrency`.
    #[builder(default = DEFAULT_CONCURRENCY)]
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// The default retry policy for rules that don't set their own `retry_policy`.
    #[builder(default)]
    #[serde(default)]
    pub retry_policy: crate::model::RetryPolicy,

    /// The default outbound rate limit (requests per second) applied to a registry
    /// endpoint that doesn't set its own `qps`. `None` disables the default limit.
    #[builder(default)]
    #[serde(default)]
    pub default_qps: Option<u32>,

    /// Path to the SQLite database backing the `ExecutionStore`.
    #[builder(default_code = "default_sqlite_path()")]
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    /// The address the demonstration HTTP server binds to.
    #[builder(default = DEFAULT_BIND_ADDR.to_string())]
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// The `tracing-subscriber` `env-filter` directive used when `RUST_LOG` is unset.
    #[builder(default = DEFAULT_LOG_LEVEL.to_string())]
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig::builder().build()
    }
}

impl GlobalConfig {
    /// Loads configuration from a TOML file at `path`, falling back to defaults for
    /// any field the file omits.
    pub fn load(path: impl AsRef<Path>) -> ReplicoreResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: GlobalConfig = toml::from_str(&raw)?;
        crate::Ok(config)
    }

    /// Serializes the configuration back to TOML, e.g. to write out a fresh default
    /// config file for a new deployment.
    pub fn to_toml(&self) -> ReplicoreResult<String> {
        crate::Ok(toml::to_string_pretty(self)?)
    }

    /// Aggregates every configuration problem into a single error rather than
    /// failing on the first.
    pub fn validate(&self) -> ReplicoreResult<()> {
        validate::validate(self)
    }
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_sqlite_path() -> PathBuf {
    crate::utils::get_replicore_home_path().join("replicore.db")
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
