//! WebSocket Server
//!
//! The endpoint remote apps attach to, the wire protocol, and the status
//! surface for the shell.

mod handler;
pub mod protocol;
mod router;

pub use handler::*;
pub use router::*;

use crate::manager::PluginManager;
use crate::store::HostStore;

/// Shared state for all routes
#[derive(Clone)]
pub struct AppState {
    pub store: HostStore,
    pub manager: PluginManager,
}

impl AppState {
    pub fn new(store: HostStore, manager: PluginManager) -> Self {
        Self { store, manager }
    }
}
