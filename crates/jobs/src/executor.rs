// crates/jobs/src/executor.rs
//! JobExecutor trait defining the interface for job work implementations.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use taskdeck_db::Job;
use thiserror::Error;

/// Errors that can occur while executing a job's work.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("agent request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("agent service returned {status}: {body}")]
    Upstream { status: u16, body: String },
}

/// Trait for the capability that performs a job's long-running work.
///
/// Implementations include:
/// - `AgentExecutor` — calls the companion agent service over HTTP
/// - Test fakes that script success/failure without any I/O
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run the job's work to completion and return its result text.
    async fn execute(&self, job: &Job) -> Result<String, ExecutorError>;

    /// Executor name for logging/display (e.g. "agent-http").
    fn name(&self) -> &str;
}

/// Default request timeout for agent calls. Research runs are slow.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Executor that hands the job payload to the companion agent service.
pub struct AgentExecutor {
    client: reqwest::Client,
    run_url: String,
}

#[derive(Debug, Deserialize)]
struct AgentRunResponse {
    output: String,
}

impl AgentExecutor {
    pub fn new(base_url: &str) -> Result<Self, ExecutorError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            run_url: format!("{}/run", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl JobExecutor for AgentExecutor {
    async fn execute(&self, job: &Job) -> Result<String, ExecutorError> {
        let response = self
            .client
            .post(&self.run_url)
            .json(&serde_json::json!({
                "kind": job.kind,
                "query": job.payload,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: AgentRunResponse = response.json().await?;
        Ok(parsed.output)
    }

    fn name(&self) -> &str {
        "agent-http"
    }
}
