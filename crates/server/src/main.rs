// crates/server/src/main.rs
//! Taskdeck server binary.
//!
//! Opens the database, wires the two job services (research + background
//! agent) to the shared push hub, spawns their schedulers, and serves the
//! HTTP API.

use std::net::SocketAddr;

use anyhow::Result;
use taskdeck_db::Database;
use taskdeck_jobs::AgentExecutor;
use taskdeck_server::{create_app, spawn_job_scheduler, AppState, SchedulerConfig};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Default port for the server.
const DEFAULT_PORT: u16 = 47310;

/// Default base URL of the companion agent service.
const DEFAULT_AGENT_URL: &str = "http://127.0.0.1:8791";

/// Get the server port from environment or use default.
fn get_port() -> u16 {
    std::env::var("TASKDECK_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Base URL of the agent service that executes job payloads.
fn get_agent_url() -> String {
    std::env::var("TASKDECK_AGENT_URL").unwrap_or_else(|_| DEFAULT_AGENT_URL.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    eprintln!("\ntaskdeck v{}\n", env!("CARGO_PKG_VERSION"));

    let db = Database::open_default().await?;

    let agent_url = get_agent_url();
    let research_exec = AgentExecutor::new(&agent_url)?;
    let agent_exec = AgentExecutor::new(&agent_url)?;
    let state = AppState::new(db, research_exec, agent_exec);

    let scheduler_config = SchedulerConfig::from_env();
    spawn_job_scheduler(state.research_jobs.clone(), &scheduler_config);
    spawn_job_scheduler(state.agent_jobs.clone(), &scheduler_config);

    let app = create_app(state);
    let port = get_port();
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    eprintln!("  listening on http://localhost:{port}\n");

    axum::serve(listener, app).await?;

    Ok(())
}
