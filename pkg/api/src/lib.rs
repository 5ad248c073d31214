pub mod admission;
pub mod handlers;
pub mod request_id;
pub mod server;

use std::sync::Arc;

use pkg_metrics::MetricsRegistry;
use pkg_state::StateStore;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: StateStore,
    pub metrics: Arc<MetricsRegistry>,
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    AppState {
        store: StateStore::in_memory(),
        metrics: Arc::new(MetricsRegistry::elastiq()),
    }
}
