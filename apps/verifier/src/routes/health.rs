use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns a simple status object with service version and chain mode.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let settings = state.verifier.settings();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "resume-verifier",
        "network": settings.network_name,
        "simulated": settings.deployed_contract().is_none(),
    }))
}

/// GET /metrics
/// Prometheus text exposition of the verification counters and latencies.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.gather_text(),
    )
}
