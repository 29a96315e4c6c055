//! Persistence mirror for queued jobs
//!
//! The store is a secondary, eventually-consistent mirror of the in-memory
//! queue, used for status queries and process-restart recovery. It is never
//! a second owner: every write goes through the queue's serialized access
//! path, so the store itself needs no coordination beyond a single
//! connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

use crate::domain::{Job, JobPriority, JobStatus};
use crate::error::{QueueError, Result};

/// Storage abstraction for the persistence mirror.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Upsert the full row for a job. Idempotent overwrite on duplicate id.
    async fn save(&self, job: &Job) -> Result<()>;

    /// Fetch a job's last persisted state.
    async fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// List persisted jobs, optionally filtered by status, newest first.
    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>>;

    /// Rows eligible for restart recovery: queued, waiting, or retry.
    async fn load_pending(&self) -> Result<Vec<Job>>;

    /// Reconcile rows orphaned in `running` by a force shutdown.
    async fn reset_running_to_queued(&self) -> Result<u64>;

    /// Job counts keyed by status string.
    async fn counts_by_status(&self) -> Result<HashMap<String, u64>>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    job_id       TEXT PRIMARY KEY,
    tool         TEXT,
    payload      TEXT NOT NULL,
    priority     INTEGER NOT NULL,
    status       TEXT NOT NULL,
    depends_on   TEXT NOT NULL,
    retry_count  INTEGER NOT NULL,
    max_retries  INTEGER NOT NULL,
    queued_at    TEXT NOT NULL,
    started_at   TEXT,
    completed_at TEXT,
    metadata     TEXT NOT NULL
)
"#;

/// SQLite-backed job store over a single embedded database file
/// (or `sqlite::memory:` in tests).
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (creating if missing) the database and ensure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // One connection: writes are already serialized by the queue, and a
        // shared in-memory database stays visible across calls.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        debug!("Job store ready at {}", database_url);

        Ok(Self { pool })
    }
}

fn row_to_job(row: &SqliteRow) -> Result<Job> {
    let payload_json: String = row.try_get("payload")?;
    let depends_on_json: String = row.try_get("depends_on")?;
    let metadata_json: String = row.try_get("metadata")?;
    let priority_ordinal: i64 = row.try_get("priority")?;
    let status: String = row.try_get("status")?;

    let priority = u8::try_from(priority_ordinal)
        .ok()
        .and_then(JobPriority::from_ordinal)
        .ok_or_else(|| {
            QueueError::SerializationError(format!(
                "Invalid priority ordinal in job row: {}",
                priority_ordinal
            ))
        })?;

    Ok(Job {
        job_id: row.try_get("job_id")?,
        tool: row.try_get("tool")?,
        payload: serde_json::from_str(&payload_json)?,
        priority,
        status: JobStatus::parse(&status)?,
        depends_on: serde_json::from_str(&depends_on_json)?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        max_retries: row.try_get::<i64, _>("max_retries")? as u32,
        queued_at: row.try_get::<DateTime<Utc>, _>("queued_at")?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
        completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
        metadata: serde_json::from_str(&metadata_json)?,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn save(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO jobs
                (job_id, tool, payload, priority, status, depends_on,
                 retry_count, max_retries, queued_at, started_at, completed_at, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.tool)
        .bind(serde_json::to_string(&job.payload)?)
        .bind(i64::from(job.priority.ordinal()))
        .bind(job.status.as_str())
        .bind(serde_json::to_string(&job.depends_on)?)
        .bind(i64::from(job.retry_count))
        .bind(i64::from(job.max_retries))
        .bind(job.queued_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(serde_json::to_string(&job.metadata)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM jobs WHERE status = ?1 ORDER BY queued_at DESC LIMIT ?2",
                )
                .bind(status.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM jobs ORDER BY queued_at DESC LIMIT ?1")
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(row_to_job).collect()
    }

    async fn load_pending(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE status IN ('queued', 'waiting', 'retry')
            ORDER BY priority ASC, queued_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_job).collect()
    }

    async fn reset_running_to_queued(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'queued', started_at = NULL WHERE status = 'running'",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn counts_by_status(&self) -> Result<HashMap<String, u64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            counts.insert(status, count as u64);
        }
        Ok(counts)
    }
}
