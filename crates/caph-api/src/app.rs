use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use caph_store::StateStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// The manager process's ambient HTTP surface: liveness, readiness, and a
/// Prometheus scrape endpoint. Nothing here is user-facing Cluster API
/// surface — that lives entirely in the Kubernetes object model this core
/// reconciles against, not behind this port.
pub fn build_app(store: Arc<dyn StateStore>, metrics_handle: PrometheusHandle) -> Router {
    let state = AppState { store, metrics_handle };

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use caph_store::InMemoryStore;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::util::ServiceExt;

    fn test_app() -> Router {
        let store = Arc::new(InMemoryStore::new());
        let handle = PrometheusBuilder::new().install_recorder().unwrap_or_else(|_| {
            // A recorder is already installed (another test in this
            // process registered one first); build a standalone handle
            // that still renders, just without being the global recorder.
            PrometheusBuilder::new().build_recorder().handle()
        });
        build_app(store, handle)
    }

    #[tokio::test]
    async fn healthz_returns_200() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_returns_200_with_empty_store() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_returns_200() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
