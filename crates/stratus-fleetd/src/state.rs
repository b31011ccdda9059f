use std::sync::Arc;

use stratus_fleet::{EventBus, ModelCacheWarmer, NodeLogStore, TripleSafetyMonitor};
use stratus_registry::Registry;

use crate::metrics::SharedMetrics;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn Registry>,
    pub monitor: Arc<TripleSafetyMonitor>,
    pub warmer: Arc<ModelCacheWarmer>,
    pub logs: Arc<NodeLogStore>,
    pub bus: Arc<EventBus>,
    pub metrics: Arc<SharedMetrics>,
}
