// crates/server/src/routes/jobs.rs
//! API routes for background jobs.
//!
//! - POST /jobs        — Create a job (research by default)
//! - GET  /jobs        — List the caller's jobs, optionally by task
//! - GET  /jobs/stream — SSE stream of the caller's job updates
//! - GET  /jobs/{id}   — Fetch a single job snapshot (polling fallback)

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use taskdeck_db::{Job, JobKind};
use taskdeck_jobs::{ClientId, EventHub};
use tokio::sync::mpsc;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Authenticated caller identity.
///
/// The auth middleware in front of this service resolves the session and
/// injects the user id as the `x-user-id` header; requests without it are
/// rejected before touching any job.
#[derive(Debug, Clone, Copy)]
pub struct Owner(pub i64);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<i64>().ok())
            .map(Owner)
            .ok_or(ApiError::Unauthorized)
    }
}

/// Request body for job creation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobRequest {
    payload: String,
    #[serde(default)]
    task_id: Option<i64>,
    #[serde(default)]
    kind: Option<JobKind>,
}

/// POST /api/jobs — Create a job owned by the caller.
async fn create_job(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let kind = request.kind.unwrap_or(JobKind::Research);
    let job = state
        .service_for(kind)
        .create_job(owner.0, request.task_id, &request.payload)
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/jobs/{id} — Current snapshot of one job.
async fn get_job(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(id): Path<i64>,
) -> ApiResult<Json<Job>> {
    // Reads are kind-agnostic; either service instance answers them.
    let job = state.research_jobs.get_job(id, owner.0).await?;
    Ok(Json(job))
}

/// Query parameters for the job listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListJobsQuery {
    #[serde(default)]
    task_id: Option<i64>,
}

/// GET /api/jobs?taskId=N — List the caller's jobs.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let jobs = state.research_jobs.list_jobs(owner.0, query.task_id).await?;
    let total = jobs.len();
    Ok(Json(serde_json::json!({
        "jobs": jobs,
        "total": total,
    })))
}

/// Deregisters the subscriber channel when the SSE connection closes.
struct SubscriptionGuard {
    hub: Arc<EventHub>,
    user_id: i64,
    client_id: ClientId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.hub.remove_client(self.user_id, self.client_id);
    }
}

/// GET /api/jobs/stream — SSE stream of the caller's job updates.
///
/// The first frame is the hub's connection preamble, then one JSON object
/// per job event. The channel is registered with the hub for the lifetime
/// of the connection and removed when the client disconnects.
async fn stream_jobs(
    State(state): State<Arc<AppState>>,
    owner: Owner,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let client_id = state.hub.add_client(owner.0, tx);
    let hub = state.hub.clone();
    let user_id = owner.0;

    let stream = async_stream::stream! {
        let _guard = SubscriptionGuard { hub, user_id, client_id };
        let mut rx = rx;
        while let Some(message) = rx.recv().await {
            yield Ok(Event::default().data(message));
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/stream", get(stream_jobs))
        .route("/jobs/{id}", get(get_job))
}
