//! Error types for replicore.

use std::fmt::{self, Display};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result type returned by fallible replicore operations.
pub type ReplicoreResult<T> = Result<T, ReplicoreError>;

/// The umbrella error type for replicore.
#[derive(pretty_error_debug::Debug, Error)]
pub enum ReplicoreError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An HTTP transport error.
    #[error("http transport error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// An HTTP middleware error (retry transport layer).
    #[error("http middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// A JSON (de)serialization error.
    #[error("json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// A TOML deserialization error.
    #[error("toml parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// A TOML serialization error.
    #[error("toml serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// A database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error.
    #[error("database migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A regular expression compilation error.
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),

    /// An OCI image spec error (e.g. an invalid digest).
    #[error("oci spec error: {0}")]
    OciSpec(#[from] oci_spec::OciSpecError),

    /// A cron expression parse error.
    #[error("invalid cron expression: {0}")]
    Cron(String),

    /// A join error from a spawned task.
    #[error("task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// A manifest or index could not be located.
    #[error("manifest not found: {repo}:{reference}")]
    ManifestNotFound {
        /// The repository searched.
        repo: String,
        /// The tag or digest reference searched.
        reference: String,
    },

    /// A blob's downloaded bytes did not hash to the digest the registry advertised.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The digest the registry claimed.
        expected: String,
        /// The digest actually computed.
        actual: String,
    },

    /// The registry responded with an unexpected status code.
    #[error("registry returned unexpected status {status} for {operation}")]
    UnexpectedStatus {
        /// The HTTP status code received.
        status: u16,
        /// A short description of the operation attempted.
        operation: String,
    },

    /// The registry's `WWW-Authenticate` challenge could not be parsed.
    #[error("invalid auth challenge: {0}")]
    InvalidAuthChallenge(String),

    /// A rule is already in flight and may not be started again.
    #[error("rule '{0}' already has an execution in flight")]
    Conflict(String),

    /// An execution was cancelled before it completed.
    #[error("execution cancelled")]
    Cancelled,

    /// A single configuration field failed validation.
    #[error("configuration invalid: {0}")]
    ConfigValidation(String),

    /// Multiple configuration fields failed validation; all are reported together.
    #[error("configuration invalid:\n{}", .0.join("\n"))]
    ConfigValidationErrors(Vec<String>),

    /// An identifier (rule id, execution id) did not resolve to a stored record.
    #[error("not found: {0}")]
    NotFound(String),

    /// Catch-all for call sites that need to wrap a foreign error without a dedicated variant.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

impl ReplicoreError {
    /// Wraps an arbitrary error into [`ReplicoreError::Custom`].
    pub fn custom(error: impl Into<anyhow::Error>) -> Self {
        ReplicoreError::Custom(AnyError(error.into()))
    }
}

/// A wrapper around [`anyhow::Error`] that supports equality for test assertions
/// and lets call sites downcast back to the concrete error they wrapped.
pub struct AnyError(anyhow::Error);

impl AnyError {
    /// Attempts to downcast the wrapped error back to a concrete type.
    pub fn downcast<T: std::error::Error + Send + Sync + 'static>(self) -> Result<T, Self> {
        self.0.downcast::<T>().map_err(AnyError)
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl std::error::Error for AnyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

/// Constructs a successful [`ReplicoreResult`]. Mirrors `std::result::Result::Ok` but
/// lets call sites write `replicore::Ok(value)` alongside `replicore::Error` variants
/// without an extra `use` for the plain `Result` constructor.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> ReplicoreResult<T> {
    Result::Ok(value)
}
