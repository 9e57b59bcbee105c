//! Type definitions for the server module.
//!
//! This module contains request and response types used by the REST API endpoints.

use serde::{Deserialize, Serialize};

use crate::model::{RegistryEndpoint, ReplicationRule};

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// Request body for `POST /tasks/run`.
#[derive(Debug, Deserialize)]
pub struct RunTaskRequest {
    /// The rule to execute.
    pub rule: ReplicationRule,
    /// The endpoint manifests and blobs are read from.
    pub source: RegistryEndpoint,
    /// The endpoint manifests and blobs are written to.
    pub target: RegistryEndpoint,
}

/// Response body for `POST /tasks/run`.
#[derive(Debug, Serialize)]
pub struct RunTaskResponse {
    /// The id of the newly started execution.
    pub execution_id: String,
}

/// Response body for `POST /tasks/:rule_id/stop`.
#[derive(Debug, Serialize)]
pub struct StopTaskResponse {
    /// The rule whose in-flight execution was signalled to cancel.
    pub rule_id: String,
}

/// Error response returned when an operation fails.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// A human-readable description of what went wrong.
    pub error: String,
}
