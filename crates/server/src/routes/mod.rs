//! API route handlers for the mediaferry server.

pub mod downloads;
pub mod health;
pub mod metrics;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router.
///
/// Routes:
/// - GET    /api/health - Health check
/// - GET    /api/downloads - Jobs visible to the caller
/// - POST   /api/downloads - Submit a download
/// - GET    /api/downloads/{id} - One job
/// - DELETE /api/downloads/{id} - Cancel a running job or delete a finished one
/// - GET    /api/downloads/progress/{id} - SSE stream of job progress
/// - GET    /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", downloads::router())
        .merge(metrics::router())
        .with_state(state)
}
