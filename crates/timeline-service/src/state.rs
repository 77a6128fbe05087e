use event_bus::EventBus;
use std::sync::Arc;
use timeline_cache::Cache;
use timeline_core::Config;
use timeline_store::Store;

/// Shared application state handed to every handler via `web::Data`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn Cache>,
    pub bus: Arc<dyn EventBus>,
    pub config: Arc<Config>,
}
