//! Shared application state for the controller server.

use std::sync::Arc;

use agent::controller::Controller;
use agent::io::reasoner::Reasoner;
use agent::io::store::ConversationStore;

/// Controller with its adapters chosen at startup.
pub type DynController = Controller<Box<dyn Reasoner>, Box<dyn ConversationStore>>;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<DynController>,
}

impl AppState {
    pub fn new(controller: DynController) -> Self {
        Self {
            controller: Arc::new(controller),
        }
    }
}
