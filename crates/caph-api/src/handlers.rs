use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::error::ApiError;
use crate::state::AppState;

/// Process liveness. Always `200` once the binary has started listening —
/// it answers "is this process alive", not "can it do useful work".
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness: the store must answer a cheap read. A manager that can't
/// list hosts can't reconcile anything, so it shouldn't receive traffic
/// from whatever fronts this port either.
pub async fn readyz(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.store.list_hosts().await?;
    Ok(StatusCode::OK)
}

/// Prometheus text exposition, rendered by the process-wide recorder
/// installed at startup (see `caph-manager`).
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}
