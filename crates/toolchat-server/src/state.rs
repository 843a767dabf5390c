use std::sync::Arc;
use toolchat::orchestrator::Orchestrator;
use toolchat::registry::InMemoryRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<InMemoryRegistry>,
}
