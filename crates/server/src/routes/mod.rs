//! API route handlers for the taskdeck server.

pub mod health;
pub mod jobs;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET  /api/health      - Health check
/// - POST /api/jobs        - Create a background job
/// - GET  /api/jobs        - List the caller's jobs (optional taskId filter)
/// - GET  /api/jobs/stream - SSE stream of the caller's job updates
/// - GET  /api/jobs/{id}   - Fetch a single job snapshot
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .with_state(state)
}
