// crates/jobs/src/service.rs
//! Job lifecycle orchestration and the pending-claim processing loop.

use serde::Serialize;
use std::sync::Arc;
use taskdeck_db::{Database, DbError, Job, JobKind, JobStatus};
use thiserror::Error;

use crate::executor::JobExecutor;
use crate::hub::EventHub;

/// Upper bound on jobs claimed in a single processing pass.
pub const DEFAULT_BATCH_SIZE: i64 = 10;

/// Errors surfaced by job service operations.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("payload must not be empty")]
    EmptyPayload,

    #[error("job not found: {0}")]
    NotFound(i64),

    #[error("job {0} does not belong to the requesting user")]
    Forbidden(i64),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Push message carrying a job snapshot, one JSON object per event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    #[serde(rename = "type")]
    pub event: &'static str,
    pub id: i64,
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Job> for JobUpdate {
    fn from(job: &Job) -> Self {
        Self {
            event: "job",
            id: job.id,
            kind: job.kind,
            status: job.status,
            result: job.result.clone(),
            error: job.error.clone(),
        }
    }
}

/// Orchestrates the lifecycle of one kind of background job.
///
/// Stateless between processing passes — everything durable lives in the
/// store, so a pass is safe to re-run, run late, or skip entirely. The
/// service is generic over its executor; the research and background-agent
/// instances differ only in kind and executor configuration.
pub struct JobService<E> {
    db: Database,
    hub: Arc<EventHub>,
    executor: E,
    kind: JobKind,
    batch_size: i64,
}

impl<E: JobExecutor> JobService<E> {
    pub fn new(db: Database, hub: Arc<EventHub>, executor: E, kind: JobKind) -> Self {
        Self {
            db,
            hub,
            executor,
            kind,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Create a job for this service's kind. The job becomes visible to the
    /// next processing pass.
    pub async fn create_job(
        &self,
        user_id: i64,
        task_id: Option<i64>,
        payload: &str,
    ) -> Result<Job, JobError> {
        if payload.trim().is_empty() {
            return Err(JobError::EmptyPayload);
        }
        let job = self.db.create_job(user_id, task_id, self.kind, payload).await?;
        tracing::info!(job_id = job.id, user_id, kind = %self.kind, "job created");
        Ok(job)
    }

    /// Fetch a job snapshot, enforcing ownership.
    ///
    /// A mismatched owner gets `Forbidden` regardless of the job's status,
    /// with no further detail about the job.
    pub async fn get_job(&self, id: i64, user_id: i64) -> Result<Job, JobError> {
        let job = self.db.get_job(id).await?.ok_or(JobError::NotFound(id))?;
        if job.user_id != user_id {
            return Err(JobError::Forbidden(id));
        }
        Ok(job)
    }

    /// List the user's jobs, optionally filtered by task.
    pub async fn list_jobs(&self, user_id: i64, task_id: Option<i64>) -> Result<Vec<Job>, JobError> {
        Ok(self.db.list_jobs(user_id, task_id).await?)
    }

    /// Run one processing pass: claim up to `batch_size` pending jobs and
    /// drive each to a terminal state.
    ///
    /// The claim is a conditional `pending -> processing` update; losing the
    /// race means another pass owns the job and it is skipped. One job's
    /// executor or storage failure never aborts the rest of the batch. Each
    /// push to the hub happens after the corresponding store transition, so
    /// per-job status pushes are monotonic.
    ///
    /// Returns the number of jobs driven to a terminal state.
    pub async fn process_pending_jobs(&self) -> Result<usize, JobError> {
        let pending = self.db.list_pending_jobs(self.kind, self.batch_size).await?;
        let mut finished = 0usize;

        for job in pending {
            let claimed = match self
                .db
                .transition_job(job.id, JobStatus::Pending, JobStatus::Processing, None, None)
                .await
            {
                Ok(Some(claimed)) => claimed,
                Ok(None) => {
                    tracing::debug!(job_id = job.id, "claim lost, job taken by another pass");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(job_id = job.id, error = %e, "failed to claim job, leaving pending");
                    continue;
                }
            };
            self.hub.send(claimed.user_id, &JobUpdate::from(&claimed));

            let outcome = self.executor.execute(&claimed).await;
            let (status, result, error) = match &outcome {
                Ok(output) => (JobStatus::Completed, Some(output.as_str()), None),
                Err(e) => {
                    tracing::warn!(
                        job_id = claimed.id,
                        executor = self.executor.name(),
                        error = %e,
                        "job execution failed"
                    );
                    (JobStatus::Error, None, Some(e.to_string()))
                }
            };

            match self
                .db
                .transition_job(claimed.id, JobStatus::Processing, status, result, error.as_deref())
                .await
            {
                Ok(Some(done)) => {
                    tracing::info!(job_id = done.id, status = %done.status, "job finished");
                    self.hub.send(done.user_id, &JobUpdate::from(&done));
                    finished += 1;
                }
                Ok(None) => {
                    tracing::warn!(job_id = claimed.id, "job left processing state, outcome discarded");
                }
                Err(e) => {
                    tracing::warn!(job_id = claimed.id, error = %e, "failed to record job outcome");
                }
            }
        }

        Ok(finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Scripted executor: counts invocations, optionally fails or stalls.
    struct FakeExecutor {
        calls: Arc<AtomicUsize>,
        fail_with: Option<String>,
        delay: Option<Duration>,
    }

    impl FakeExecutor {
        fn ok() -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: calls.clone(),
                    fail_with: None,
                    delay: None,
                },
                calls,
            )
        }

        fn failing(message: &str) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                fail_with: Some(message.to_string()),
                delay: None,
            }
        }

        fn slow(delay: Duration) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: calls.clone(),
                    fail_with: None,
                    delay: Some(delay),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl JobExecutor for FakeExecutor {
        async fn execute(&self, job: &Job) -> Result<String, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.fail_with {
                Some(message) => Err(ExecutorError::Upstream {
                    status: 500,
                    body: message.clone(),
                }),
                None => Ok(format!("done: {}", job.payload)),
            }
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    async fn service_with<Ex: JobExecutor>(executor: Ex) -> (JobService<Ex>, Arc<EventHub>) {
        let db = Database::new_in_memory().await.unwrap();
        let hub = Arc::new(EventHub::new());
        (
            JobService::new(db, hub.clone(), executor, JobKind::Research),
            hub,
        )
    }

    #[tokio::test]
    async fn test_create_job_rejects_empty_payload() {
        let (service, _hub) = service_with(FakeExecutor::ok().0).await;
        let err = service.create_job(1, None, "   ").await.unwrap_err();
        assert!(matches!(err, JobError::EmptyPayload));
    }

    #[tokio::test]
    async fn test_get_job_enforces_ownership() {
        let (service, _hub) = service_with(FakeExecutor::ok().0).await;
        let job = service.create_job(1, None, "mine").await.unwrap();

        let err = service.get_job(job.id, 2).await.unwrap_err();
        assert!(matches!(err, JobError::Forbidden(_)));

        let err = service.get_job(9999, 1).await.unwrap_err();
        assert!(matches!(err, JobError::NotFound(9999)));

        let fetched = service.get_job(job.id, 1).await.unwrap();
        assert_eq!(fetched.id, job.id);
    }

    #[tokio::test]
    async fn test_forbidden_applies_to_terminal_jobs_too() {
        let (service, _hub) = service_with(FakeExecutor::ok().0).await;
        let job = service.create_job(1, None, "mine").await.unwrap();
        service.process_pending_jobs().await.unwrap();

        let err = service.get_job(job.id, 2).await.unwrap_err();
        assert!(matches!(err, JobError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_process_with_no_pending_jobs_is_noop() {
        let (service, hub) = service_with(FakeExecutor::ok().0).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.add_client(1, tx);

        let finished = service.process_pending_jobs().await.unwrap();
        assert_eq!(finished, 0);

        rx.recv().await.unwrap(); // preamble
        assert!(rx.try_recv().is_err(), "no pushes expected");
    }

    #[tokio::test]
    async fn test_process_drives_job_to_completed_and_pushes() {
        let (executor, calls) = FakeExecutor::ok();
        let (service, hub) = service_with(executor).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.add_client(7, tx);

        let job = service.create_job(7, None, "summarize week").await.unwrap();
        let finished = service.process_pending_jobs().await.unwrap();
        assert_eq!(finished, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let snapshot = service.get_job(job.id, 7).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.result.as_deref(), Some("done: summarize week"));
        assert!(snapshot.error.is_none());

        // Pushes are monotonic: preamble, processing, then the terminal state
        assert!(rx.recv().await.unwrap().contains("connected"));
        assert!(rx.recv().await.unwrap().contains("\"status\":\"processing\""));
        let terminal = rx.recv().await.unwrap();
        assert!(terminal.contains("\"status\":\"completed\""));
        assert!(terminal.contains("summarize week"));
        assert!(rx.try_recv().is_err(), "exactly one terminal push");
    }

    #[tokio::test]
    async fn test_failing_executor_marks_job_error() {
        let (service, hub) = service_with(FakeExecutor::failing("model overloaded")).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.add_client(3, tx);

        let job = service.create_job(3, None, "doomed run").await.unwrap();
        // The executor failure is absorbed, not returned
        let finished = service.process_pending_jobs().await.unwrap();
        assert_eq!(finished, 1);

        let snapshot = service.get_job(job.id, 3).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Error);
        assert!(snapshot.error.as_deref().unwrap().contains("model overloaded"));
        assert!(snapshot.result.is_none());

        rx.recv().await.unwrap(); // preamble
        rx.recv().await.unwrap(); // processing
        assert!(rx.recv().await.unwrap().contains("\"status\":\"error\""));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_the_batch() {
        let (service, _hub) = service_with(FakeExecutor::failing("always fails")).await;
        service.create_job(1, None, "first").await.unwrap();
        service.create_job(1, None, "second").await.unwrap();

        let finished = service.process_pending_jobs().await.unwrap();
        assert_eq!(finished, 2);

        let jobs = service.list_jobs(1, None).await.unwrap();
        assert!(jobs.iter().all(|j| j.status == JobStatus::Error));
    }

    #[tokio::test]
    async fn test_concurrent_passes_execute_each_job_once() {
        let db = Database::new_in_memory().await.unwrap();
        let hub = Arc::new(EventHub::new());
        let (executor_a, calls_a) = FakeExecutor::slow(Duration::from_millis(50));
        let (executor_b, calls_b) = FakeExecutor::slow(Duration::from_millis(50));
        let service_a = JobService::new(db.clone(), hub.clone(), executor_a, JobKind::Research);
        let service_b = JobService::new(db.clone(), hub.clone(), executor_b, JobKind::Research);

        db.create_job(1, None, JobKind::Research, "only once").await.unwrap();

        let (ran_a, ran_b) = tokio::join!(
            service_a.process_pending_jobs(),
            service_b.process_pending_jobs()
        );
        let total = ran_a.unwrap() + ran_b.unwrap();
        assert_eq!(total, 1, "exactly one pass performs the execution");
        assert_eq!(calls_a.load(Ordering::SeqCst) + calls_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_kind_isolation_between_services() {
        let db = Database::new_in_memory().await.unwrap();
        let hub = Arc::new(EventHub::new());
        let (executor, calls) = FakeExecutor::ok();
        let research = JobService::new(db.clone(), hub.clone(), executor, JobKind::Research);

        db.create_job(1, None, JobKind::Agent, "not mine").await.unwrap();
        let finished = research.process_pending_jobs().await.unwrap();
        assert_eq!(finished, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_job_update_wire_shape() {
        let update = JobUpdate {
            event: "job",
            id: 12,
            kind: JobKind::Agent,
            status: JobStatus::Completed,
            result: Some("all good".into()),
            error: None,
        };
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"type\":\"job\""));
        assert!(json.contains("\"kind\":\"agent\""));
        assert!(json.contains("\"result\":\"all good\""));
        assert!(!json.contains("error"));
    }
}
