// crates/db/src/jobs.rs
// Background job records: types, row mapping, and CRUD queries.

use crate::{Database, DbResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::fmt;

/// Lifecycle state of a background job.
///
/// Transitions only along `pending -> processing -> {completed, error}`;
/// terminal states are never left. All transitions go through
/// [`Database::transition_job`], which enforces the prior state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which service instance processes a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Research,
    Agent,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Research => "research",
            JobKind::Agent => "agent",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "research" => Some(JobKind::Research),
            "agent" => Some(JobKind::Agent),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted background job.
///
/// `result` is set only once the job completes; `error` only once it fails.
/// Both stay NULL while the job is pending or processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: i64,
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
    pub kind: JobKind,
    pub payload: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for Job {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let status_str: String = row.try_get("status")?;
        let status = JobStatus::from_db_str(&status_str).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "status".into(),
            source: format!("unknown job status: {status_str}").into(),
        })?;
        let kind_str: String = row.try_get("kind")?;
        let kind = JobKind::from_db_str(&kind_str).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "kind".into(),
            source: format!("unknown job kind: {kind_str}").into(),
        })?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            task_id: row.try_get("task_id")?,
            kind,
            payload: row.try_get("payload")?,
            status,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Database {
    /// Create a new job with status `pending`.
    pub async fn create_job(
        &self,
        user_id: i64,
        task_id: Option<i64>,
        kind: JobKind,
        payload: &str,
    ) -> DbResult<Job> {
        let now = Utc::now().to_rfc3339();
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO jobs (user_id, task_id, kind, payload, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(task_id)
        .bind(kind.as_str())
        .bind(payload)
        .bind(&now)
        .fetch_one(self.pool())
        .await?;

        Ok(Job {
            id: row.0,
            user_id,
            task_id,
            kind,
            payload: payload.to_string(),
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Fetch a job by id.
    pub async fn get_job(&self, id: i64) -> DbResult<Option<Job>> {
        let job: Option<Job> = sqlx::query_as("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(job)
    }

    /// List a user's jobs, newest first, optionally filtered by task.
    pub async fn list_jobs(&self, user_id: i64, task_id: Option<i64>) -> DbResult<Vec<Job>> {
        let jobs: Vec<Job> = match task_id {
            Some(task_id) => {
                sqlx::query_as(
                    "SELECT * FROM jobs WHERE user_id = ?1 AND task_id = ?2 \
                     ORDER BY created_at DESC, id DESC",
                )
                .bind(user_id)
                .bind(task_id)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT * FROM jobs WHERE user_id = ?1 \
                     ORDER BY created_at DESC, id DESC",
                )
                .bind(user_id)
                .fetch_all(self.pool())
                .await?
            }
        };
        Ok(jobs)
    }

    /// List pending jobs of a kind, oldest-created first, bounded by `limit`.
    pub async fn list_pending_jobs(&self, kind: JobKind, limit: i64) -> DbResult<Vec<Job>> {
        let jobs: Vec<Job> = sqlx::query_as(
            "SELECT * FROM jobs WHERE status = 'pending' AND kind = ?1 \
             ORDER BY created_at ASC, id ASC \
             LIMIT ?2",
        )
        .bind(kind.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(jobs)
    }

    /// Compare-and-set status transition.
    ///
    /// Updates the job only if its current status still equals `from`,
    /// returning the updated row, or `None` when the precondition failed
    /// (the job was claimed by another pass or already reached a terminal
    /// state). This is the mechanism that guarantees at most one active
    /// execution per job.
    pub async fn transition_job(
        &self,
        id: i64,
        from: JobStatus,
        to: JobStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> DbResult<Option<Job>> {
        let updated_at = Utc::now().to_rfc3339();
        let job: Option<Job> = sqlx::query_as(
            "UPDATE jobs SET status = ?2, result = ?3, error = ?4, updated_at = ?5 \
             WHERE id = ?1 AND status = ?6 \
             RETURNING *",
        )
        .bind(id)
        .bind(to.as_str())
        .bind(result)
        .bind(error)
        .bind(&updated_at)
        .bind(from.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(job)
    }
}
