//! Default values for [`super::GlobalConfig`] fields.

/// The default worker pool size applied process-wide.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// The default bind address for the demonstration HTTP server.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7070";

/// The default `tracing-subscriber` filter directive.
pub const DEFAULT_LOG_LEVEL: &str = "info";
