/// Inline SQL migrations for the taskdeck database schema.
///
/// We use simple inline migrations rather than sqlx migration files
/// because the schema is small and self-contained.

pub const MIGRATIONS: &[&str] = &[
    // Migration 1: jobs table
    r#"
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    task_id INTEGER,
    kind TEXT NOT NULL DEFAULT 'research',
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    result TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#,
    // Migration 2: index for the pending-claim scan (oldest first, per kind)
    r#"
CREATE INDEX IF NOT EXISTS idx_jobs_pending ON jobs(status, kind, created_at);
"#,
    // Migration 3: index for per-user listings
    r#"
CREATE INDEX IF NOT EXISTS idx_jobs_user ON jobs(user_id, created_at DESC);
"#,
];
