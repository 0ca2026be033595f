// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;
use taskdeck_db::{Database, JobKind};
use taskdeck_jobs::{AgentExecutor, EventHub, JobService};

/// Shared application state accessible from all route handlers.
///
/// Constructed explicitly at startup and injected into the router, so each
/// test builds a fresh instance against an in-memory database.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Database handle for job queries.
    pub db: Database,
    /// Per-user push registry shared by both job services.
    pub hub: Arc<EventHub>,
    /// Research job service (user-triggered research runs).
    pub research_jobs: Arc<JobService<AgentExecutor>>,
    /// Background-agent job service.
    pub agent_jobs: Arc<JobService<AgentExecutor>>,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    ///
    /// The two services share the database and hub; they differ only in the
    /// job kind they claim and the executor configuration they carry.
    pub fn new(db: Database, research_exec: AgentExecutor, agent_exec: AgentExecutor) -> Arc<Self> {
        let hub = Arc::new(EventHub::new());
        let research_jobs = Arc::new(JobService::new(
            db.clone(),
            hub.clone(),
            research_exec,
            JobKind::Research,
        ));
        let agent_jobs = Arc::new(JobService::new(
            db.clone(),
            hub.clone(),
            agent_exec,
            JobKind::Agent,
        ));
        Arc::new(Self {
            start_time: Instant::now(),
            db,
            hub,
            research_jobs,
            agent_jobs,
        })
    }

    /// The service instance that processes jobs of the given kind.
    pub fn service_for(&self, kind: JobKind) -> &Arc<JobService<AgentExecutor>> {
        match kind {
            JobKind::Research => &self.research_jobs,
            JobKind::Agent => &self.agent_jobs,
        }
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to create an AppState with an in-memory database for testing.
    async fn test_state() -> Arc<AppState> {
        let db = Database::new_in_memory().await.expect("in-memory DB");
        // Executor endpoints are never called by these tests
        let research = AgentExecutor::new("http://127.0.0.1:9").expect("executor");
        let agent = AgentExecutor::new("http://127.0.0.1:9").expect("executor");
        AppState::new(db, research, agent)
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let state = test_state().await;
        assert!(state.uptime_secs() < 5);
        assert_eq!(state.hub.client_count(1), 0);
    }

    #[tokio::test]
    async fn test_service_for_dispatches_by_kind() {
        let state = test_state().await;
        assert_eq!(state.service_for(JobKind::Research).kind(), JobKind::Research);
        assert_eq!(state.service_for(JobKind::Agent).kind(), JobKind::Agent);
    }
}
