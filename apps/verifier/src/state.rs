use std::sync::Arc;

use crate::metrics::PrometheusMetrics;
use crate::verification::orchestrator::Verifier;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Verification context: settings resolved once at startup plus chain,
    /// signer and metrics collaborators.
    pub verifier: Arc<Verifier>,
    pub metrics: PrometheusMetrics,
}
