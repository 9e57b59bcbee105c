//! HTTP request handlers for the REST API.
//!
//! This module implements the handlers for each API endpoint. The handlers
//! coordinate with the [`crate::scheduler::Scheduler`] to perform the requested
//! operations.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use super::state::ServerState;
use super::types::{ErrorResponse, RunTaskRequest, RunTaskResponse, StopTaskResponse};

//-------------------------------------------------------------------------------------------------
// Functions: Handlers
//-------------------------------------------------------------------------------------------------

/// Handler for `POST /tasks/run`: binds `ExecuteRule`.
pub async fn run_handler(State(state): State<ServerState>, Json(req): Json<RunTaskRequest>) -> impl IntoResponse {
    match state.scheduler().execute_rule(req.rule, req.source, req.target).await {
        Ok(execution_id) => (StatusCode::ACCEPTED, Json(RunTaskResponse { execution_id })).into_response(),
        Err(e) => (StatusCode::CONFLICT, Json(ErrorResponse { error: e.to_string() })).into_response(),
    }
}

/// Handler for `POST /tasks/:rule_id/stop`: binds `CancelRule`.
pub async fn stop_handler(State(state): State<ServerState>, Path(rule_id): Path<String>) -> impl IntoResponse {
    match state.scheduler().cancel_rule(&rule_id).await {
        Ok(()) => (StatusCode::OK, Json(StopTaskResponse { rule_id })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() })).into_response(),
    }
}

/// Handler for `GET /ws`: binds `Subscribe`, relaying every progress event onto the
/// socket as JSON text frames until the client disconnects.
pub async fn ws_handler(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| subscribe_loop(socket, state))
}

async fn subscribe_loop(mut socket: WebSocket, state: ServerState) {
    let mut progress = state.scheduler().subscribe();
    loop {
        tokio::select! {
            event = progress.recv() => {
                let Ok(event) = event else { break };
                let Ok(payload) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                if incoming.is_none() {
                    break;
                }
            }
        }
    }
}
