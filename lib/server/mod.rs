//! A thin binding of `ExecuteRule`/`CancelRule`/`Subscribe` to HTTP.
//!
//! This exists to demonstrate the core's external interface and to give the test
//! suite something to drive end-to-end; it deliberately does not grow into
//! rule/registry/notification CRUD, which remains the external management plane's
//! job.

mod handlers;
mod routes;
mod state;
mod types;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use routes::create_router;
pub use state::ServerState;
