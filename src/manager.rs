//! Queue manager façade
//!
//! Composes the store, queue, retry policy, escalation manager, and worker
//! pool behind a single submit/cancel/list/stats surface with a start/stop
//! lifecycle. The orchestrator is injected; the manager never interprets
//! payloads.

use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::config::QueueConfig;
use crate::domain::{Job, JobPriority, JobStatus};
use crate::error::Result;
use crate::escalation::EscalationManager;
use crate::queue::{JobQueue, QueueStats};
use crate::storage::{JobStore, SqliteJobStore};
use crate::worker::{Orchestrator, WorkerPool};

pub struct QueueManager {
    config: QueueConfig,
    queue: Arc<JobQueue>,
    pool: WorkerPool,
}

impl QueueManager {
    /// Open the configured SQLite mirror and wire the components together.
    pub async fn new(config: QueueConfig, orchestrator: Arc<dyn Orchestrator>) -> Result<Self> {
        let store = Arc::new(SqliteJobStore::connect(&config.database_url).await?);
        Ok(Self::with_store(config, orchestrator, store))
    }

    /// Wire the components over a caller-provided store (tests, embedders).
    pub fn with_store(
        config: QueueConfig,
        orchestrator: Arc<dyn Orchestrator>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        let queue = Arc::new(JobQueue::new(store, config.fail_dependents));
        let escalation = Arc::new(EscalationManager::new(config.escalation_rules.clone()));
        let pool = WorkerPool::new(
            queue.clone(),
            orchestrator,
            escalation,
            config.retry.to_policy(),
            config.poll_timeout(),
        );
        Self {
            config,
            queue,
            pool,
        }
    }

    /// Reload pending rows from the mirror; call once before starting
    /// workers after a restart.
    pub async fn recover(&self) -> Result<usize> {
        self.queue.recover().await
    }

    /// Validate and submit a job built from a caller payload. Returns the
    /// job id on acceptance.
    pub async fn submit_job(
        &self,
        payload: Value,
        priority: JobPriority,
        depends_on: Vec<String>,
    ) -> Result<String> {
        let job = Job::from_payload(
            payload,
            priority,
            depends_on,
            self.config.retry.max_retries,
        )?;
        let job_id = job.job_id.clone();
        self.queue.submit(job).await?;
        Ok(job_id)
    }

    /// Submit a pre-built job (escalation follow-ups, embedders with their
    /// own construction path).
    pub async fn submit(&self, job: Job) -> Result<()> {
        self.queue.submit(job).await
    }

    /// Cancel a waiting or queued job. `false` when the job is running,
    /// terminal, or unknown.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool> {
        self.queue.cancel(job_id).await
    }

    /// Last persisted state of a job; `None` for unknown ids.
    pub async fn get_job_status(&self, job_id: &str) -> Result<Option<Job>> {
        self.queue.get_job_status(job_id).await
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>> {
        self.queue.list_jobs(status, limit).await
    }

    pub async fn get_stats(&self) -> Result<QueueStats> {
        self.queue.get_stats().await
    }

    /// Start the configured number of workers.
    pub async fn start_workers(&self) {
        info!("Starting queue manager with {} worker(s)", self.config.worker_count);
        self.pool.start(self.config.worker_count).await;
    }

    /// Stop the workers. Graceful waits out in-flight iterations; force
    /// abandons running jobs for `recover()` to reconcile on restart.
    pub async fn stop(&self, graceful: bool) {
        self.pool.stop(graceful).await;
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }
}
