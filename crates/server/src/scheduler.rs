// crates/server/src/scheduler.rs
//! Recurring driver for the job services' processing passes.
//!
//! The services themselves know nothing about timing; this harness invokes
//! `process_pending_jobs` on a fixed interval. Each loop run finishes before
//! the next sleep starts, so a single scheduler never overlaps itself.

use std::sync::Arc;
use std::time::Duration;
use taskdeck_jobs::{JobExecutor, JobService};
use tokio::task::JoinHandle;

/// Default seconds between processing passes.
const DEFAULT_POLL_SECS: u64 = 5;

/// Scheduler configuration, read from the environment:
/// - `TASKDECK_JOBS_DISABLED` — truthy value disables background processing
/// - `TASKDECK_JOB_POLL_SECS` — seconds between passes (default 5)
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub disabled: bool,
    pub interval: Duration,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("TASKDECK_JOBS_DISABLED").ok().as_deref(),
            std::env::var("TASKDECK_JOB_POLL_SECS").ok().as_deref(),
        )
    }

    fn from_vars(disabled: Option<&str>, poll_secs: Option<&str>) -> Self {
        let disabled = matches!(disabled, Some("1") | Some("true") | Some("yes"));
        let interval = poll_secs
            .and_then(|value| value.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_POLL_SECS));
        Self { disabled, interval }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            interval: Duration::from_secs(DEFAULT_POLL_SECS),
        }
    }
}

/// Spawn the recurring processing loop for one job service.
///
/// Returns `None` when the scheduler is disabled; pending jobs then simply
/// wait in the store until a scheduler picks them up again. A failed pass is
/// logged and retried on the next tick.
pub fn spawn_job_scheduler<E>(
    service: Arc<JobService<E>>,
    config: &SchedulerConfig,
) -> Option<JoinHandle<()>>
where
    E: JobExecutor + 'static,
{
    if config.disabled {
        tracing::info!(kind = %service.kind(), "background job scheduler disabled");
        return None;
    }

    let interval = config.interval;
    Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match service.process_pending_jobs().await {
                Ok(0) => {}
                Ok(finished) => {
                    tracing::info!(kind = %service.kind(), finished, "processed background jobs");
                }
                Err(e) => {
                    tracing::warn!(kind = %service.kind(), error = %e, "job processing pass failed (non-fatal)");
                }
            }
        }
    }))
}
