use std::sync::Arc;

use caph_store::StateStore;
use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub metrics_handle: PrometheusHandle,
}
