pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;
use crate::verification::handlers;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(health::metrics_handler))
        // Content hashing
        .route("/api/v1/hash", post(handlers::handle_hash))
        // Verification API
        .route("/api/v1/verify", post(handlers::handle_verify))
        .route("/api/v1/verify/batch", post(handlers::handle_verify_batch))
        .route("/api/v1/verify/:hash", get(handlers::handle_check))
        .route("/api/v1/status", get(handlers::handle_status))
        .with_state(state)
}
