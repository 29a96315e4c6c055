//! Worker pool draining the job queue
//!
//! N independent loops pull jobs from the queue, hand the payload to the
//! external orchestrator, and feed the outcome back: complete, retry (with
//! backoff), escalate, or terminal failure. Nothing an orchestrator call
//! does can kill a worker loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::Job;
use crate::error::{QueueError, Result};
use crate::escalation::{EscalationManager, EscalationReason};
use crate::queue::JobQueue;
use crate::retry::RetryPolicy;

/// Structured outcome of one orchestrator execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// External collaborator that turns a job payload into a running process.
///
/// The pool forwards the payload verbatim and never inspects its semantics.
/// Implementations must enforce their own per-job execution timeout and
/// report it as `QueueError::Timeout`.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn execute(&self, payload: &Value) -> Result<ExecutionResult>;
}

/// Concurrent workers draining the queue.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    orchestrator: Arc<dyn Orchestrator>,
    escalation: Arc<EscalationManager>,
    retry_policy: RetryPolicy,
    poll_timeout: Duration,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        orchestrator: Arc<dyn Orchestrator>,
        escalation: Arc<EscalationManager>,
        retry_policy: RetryPolicy,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            escalation,
            retry_policy,
            poll_timeout,
            running: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn `worker_count` loops. Idempotent while already running.
    pub async fn start(&self, worker_count: usize) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Worker pool already running");
            return;
        }

        let mut handles = self.handles.lock().await;
        for worker_id in 0..worker_count {
            let queue = self.queue.clone();
            let orchestrator = self.orchestrator.clone();
            let escalation = self.escalation.clone();
            let retry_policy = self.retry_policy.clone();
            let poll_timeout = self.poll_timeout;
            let running = self.running.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(
                    worker_id,
                    queue,
                    orchestrator,
                    escalation,
                    retry_policy,
                    poll_timeout,
                    running,
                )
                .await;
            }));
        }
        info!("Started {} worker(s)", worker_count);
    }

    /// Stop the pool. Graceful waits for in-flight iterations to finish;
    /// force aborts the loops, abandoning any job mid-execution in Running
    /// state (reconciled by `JobQueue::recover` on the next start).
    pub async fn stop(&self, graceful: bool) {
        self.running.store(false, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();

        if !graceful {
            for handle in &handles {
                handle.abort();
            }
        }
        let _ = futures::future::join_all(handles).await;
        info!(
            "Worker pool stopped ({})",
            if graceful { "graceful" } else { "forced" }
        );
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<JobQueue>,
    orchestrator: Arc<dyn Orchestrator>,
    escalation: Arc<EscalationManager>,
    retry_policy: RetryPolicy,
    poll_timeout: Duration,
    running: Arc<AtomicBool>,
) {
    debug!("Worker {} started", worker_id);
    while running.load(Ordering::SeqCst) {
        // Bounded wait so the shutdown flag is observed promptly.
        match queue.get_next(poll_timeout).await {
            Ok(Some(job)) => {
                if let Err(err) = handle_job(
                    worker_id,
                    &queue,
                    &orchestrator,
                    &escalation,
                    &retry_policy,
                    job,
                )
                .await
                {
                    // Bookkeeping errors are logged, never fatal to the loop.
                    error!("Worker {}: job bookkeeping failed: {}", worker_id, err);
                }
            }
            Ok(None) => continue,
            Err(err) => {
                error!("Worker {}: dequeue failed: {}", worker_id, err);
                tokio::time::sleep(poll_timeout).await;
            }
        }
    }
    debug!("Worker {} exited", worker_id);
}

async fn handle_job(
    worker_id: usize,
    queue: &JobQueue,
    orchestrator: &Arc<dyn Orchestrator>,
    escalation: &EscalationManager,
    retry_policy: &RetryPolicy,
    job: Job,
) -> Result<()> {
    let correlation_id = Uuid::new_v4();
    info!(
        worker_id,
        %correlation_id,
        job_id = %job.job_id,
        attempt = job.retry_count,
        "Executing job"
    );

    let reason = match orchestrator.execute(&job.payload).await {
        Ok(result) if result.success => {
            debug!(%correlation_id, job_id = %job.job_id, "Job succeeded");
            return queue.mark_complete(&job.job_id).await;
        }
        Ok(result) => {
            warn!(
                %correlation_id,
                job_id = %job.job_id,
                exit_code = result.exit_code,
                stderr = %result.stderr,
                "Job reported failure"
            );
            EscalationReason::Failure
        }
        Err(QueueError::Timeout(msg)) => {
            warn!(%correlation_id, job_id = %job.job_id, "Job timed out: {}", msg);
            EscalationReason::Timeout
        }
        Err(err) => {
            warn!(%correlation_id, job_id = %job.job_id, "Orchestrator error: {}", err);
            EscalationReason::Failure
        }
    };

    if escalation.should_escalate(&job, reason) {
        queue.mark_escalated(&job.job_id).await?;
        if let Some(escalated) = escalation.create_escalation_job(&job, reason) {
            queue.submit(escalated).await?;
        }
        return Ok(());
    }

    if job.can_retry() {
        let delay = retry_policy.get_delay(job.retry_count);
        if !delay.is_zero() {
            debug!(
                %correlation_id,
                job_id = %job.job_id,
                delay_ms = delay.as_millis() as u64,
                "Backing off before retry"
            );
            tokio::time::sleep(delay).await;
        }
    }
    let requeued = queue.requeue_for_retry(&job.job_id).await?;
    if !requeued {
        warn!(%correlation_id, job_id = %job.job_id, "Retry budget exhausted");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobPriority;
    use crate::retry::BackoffStrategy;
    use crate::storage::SqliteJobStore;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    struct FlakyOrchestrator {
        failures_before_success: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Orchestrator for FlakyOrchestrator {
        async fn execute(&self, _payload: &Value) -> Result<ExecutionResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Ok(ExecutionResult {
                    success: false,
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: "boom".to_string(),
                })
            } else {
                Ok(ExecutionResult {
                    success: true,
                    exit_code: 0,
                    stdout: "ok".to_string(),
                    stderr: String::new(),
                })
            }
        }
    }

    fn immediate_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            strategy: BackoffStrategy::Immediate,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    async fn pool_with(
        orchestrator: Arc<dyn Orchestrator>,
    ) -> (Arc<JobQueue>, WorkerPool) {
        let store = SqliteJobStore::connect("sqlite::memory:").await.unwrap();
        let queue = Arc::new(JobQueue::new(Arc::new(store), true));
        let pool = WorkerPool::new(
            queue.clone(),
            orchestrator,
            Arc::new(EscalationManager::new(HashMap::new())),
            immediate_policy(),
            Duration::from_millis(20),
        );
        (queue, pool)
    }

    async fn wait_for_terminal(queue: &JobQueue, job_id: &str) -> Job {
        for _ in 0..200 {
            if let Some(job) = queue.get_job_status(job_id).await.unwrap() {
                if job.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal status", job_id);
    }

    #[tokio::test]
    async fn test_worker_retries_until_success() {
        let orchestrator = Arc::new(FlakyOrchestrator {
            failures_before_success: 2,
            calls: AtomicUsize::new(0),
        });
        let (queue, pool) = pool_with(orchestrator.clone()).await;

        queue
            .submit(Job::new(
                "flaky",
                None,
                json!({"job_id": "flaky"}),
                JobPriority::Normal,
                3,
            ))
            .await
            .unwrap();

        pool.start(2).await;
        let job = wait_for_terminal(&queue, "flaky").await;
        pool.stop(true).await;

        assert_eq!(job.status, crate::domain::JobStatus::Completed);
        assert_eq!(job.retry_count, 2);
        assert_eq!(orchestrator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_worker_marks_failed_after_budget() {
        let orchestrator = Arc::new(FlakyOrchestrator {
            failures_before_success: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let (queue, pool) = pool_with(orchestrator).await;

        queue
            .submit(Job::new(
                "doomed",
                None,
                json!({"job_id": "doomed"}),
                JobPriority::Normal,
                2,
            ))
            .await
            .unwrap();

        pool.start(1).await;
        let job = wait_for_terminal(&queue, "doomed").await;
        pool.stop(true).await;

        assert_eq!(job.status, crate::domain::JobStatus::Failed);
        assert_eq!(job.retry_count, 2);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_prompt() {
        let orchestrator = Arc::new(FlakyOrchestrator {
            failures_before_success: 0,
            calls: AtomicUsize::new(0),
        });
        let (_queue, pool) = pool_with(orchestrator).await;

        pool.start(2).await;
        assert!(pool.is_running());
        pool.stop(true).await;
        assert!(!pool.is_running());
        // Second stop has nothing to join.
        pool.stop(false).await;
    }
}
