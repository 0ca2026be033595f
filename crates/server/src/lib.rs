// crates/server/src/lib.rs
//! Taskdeck server library.
//!
//! This crate provides the Axum-based HTTP server for the taskdeck
//! background job subsystem: REST endpoints for creating and polling jobs,
//! and an SSE endpoint that pushes job-state changes to connected clients.

pub mod error;
pub mod routes;
pub mod scheduler;
pub mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::api_routes;
pub use scheduler::{spawn_job_scheduler, SchedulerConfig};
pub use state::AppState;

use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, jobs, job stream)
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================
