//! Route definitions for the HTTP server.
//!
//! This module sets up the routing for the REST API endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::{handlers, state::ServerState};

//-------------------------------------------------------------------------------------------------
// Functions
//-------------------------------------------------------------------------------------------------

/// Creates a router exposing the `ExecuteRule`/`CancelRule`/`Subscribe` boundary.
///
/// ## Arguments
/// * `state` - The shared server state
///
/// # Returns
/// A configured Router instance
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/tasks/run", post(handlers::run_handler))
        .route("/tasks/{rule_id}/stop", post(handlers::stop_handler))
        .route("/ws", get(handlers::ws_handler))
        .with_state(state)
}
