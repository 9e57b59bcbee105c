//! Server state management.
//!
//! This module provides the [`ServerState`] type which manages the shared
//! [`Scheduler`] instance handlers dispatch against.

use std::sync::Arc;

use crate::scheduler::Scheduler;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// Shared server state carrying the scheduler all handlers dispatch through.
#[derive(Clone)]
pub struct ServerState {
    scheduler: Arc<Scheduler>,
}

impl ServerState {
    /// Wraps an already-constructed scheduler for use by the HTTP routes.
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        ServerState { scheduler }
    }

    /// The shared scheduler instance.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}
