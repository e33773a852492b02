use chatdigest_core::{DigestCore, DigestNotifier};
use std::sync::Arc;

/// Shared by all API handlers.
pub struct ServerState {
    pub core: DigestCore,
    pub notifier: Arc<dyn DigestNotifier>,
}

pub type AppState = Arc<ServerState>;
