//! Priority-ordered, dependency-aware job queue
//!
//! The queue owns four structures: a ready heap workers dequeue from, an
//! active map of running jobs, a waiting map of dependency-blocked jobs, and
//! the completed-id set used for readiness checks. A live job is in exactly
//! one of them at any instant. All four live behind a single mutex so no
//! operation can observe a partial update, and every mutation persists its
//! row to the mirror store before touching the in-memory structures.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{Job, JobStatus};
use crate::error::{QueueError, Result};
use crate::storage::JobStore;

/// Heap entry ordering: priority ordinal ascending, then `queued_at`
/// ascending (stable FIFO within a priority class). `BinaryHeap` is a
/// max-heap, so both comparisons are reversed.
#[derive(Debug, Clone)]
struct ReadyEntry {
    job: Job,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.job.job_id == other.job.job_id
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match other.job.priority.cmp(&self.job.priority) {
            std::cmp::Ordering::Equal => other.job.queued_at.cmp(&self.job.queued_at),
            ordering => ordering,
        }
    }
}

#[derive(Default)]
struct QueueState {
    ready: BinaryHeap<ReadyEntry>,
    active: HashMap<String, Job>,
    waiting: HashMap<String, Job>,
    completed: HashSet<String>,
}

/// Counts per status from the persistence mirror plus live structure sizes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub jobs_by_status: HashMap<String, u64>,
    pub ready: usize,
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
}

/// The ordering/dependency/persistence engine.
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    store: Arc<dyn JobStore>,
    fail_dependents: bool,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, fail_dependents: bool) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            store,
            fail_dependents,
        }
    }

    /// Persist the job, then place it in the ready heap or the waiting map
    /// depending on whether its dependencies are already completed.
    ///
    /// Duplicate ids overwrite the persisted row (callers must generate
    /// unique ids; racing submitters get last-write-wins persistence).
    pub async fn submit(&self, mut job: Job) -> Result<()> {
        if job.job_id.is_empty() {
            return Err(QueueError::ValidationError(
                "Job id must not be empty".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        let ready = job.is_ready(&state.completed);
        job.status = if ready {
            JobStatus::Queued
        } else {
            JobStatus::Waiting
        };

        self.store.save(&job).await?;

        debug!(
            "Submitted job {} ({}, priority {})",
            job.job_id, job.status, job.priority
        );
        if ready {
            state.ready.push(ReadyEntry { job });
            self.notify.notify_waiters();
        } else {
            state.waiting.insert(job.job_id.clone(), job);
        }
        Ok(())
    }

    /// Wait up to `timeout` for a ready job; claimed jobs move to the active
    /// map with status `Running`. `Ok(None)` means no job was available;
    /// the timeout is a cooperative-yield bound, not an error.
    pub async fn get_next(&self, timeout: Duration) -> Result<Option<Job>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(job) = self.try_claim().await? {
                return Ok(Some(job));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn try_claim(&self) -> Result<Option<Job>> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.ready.pop() else {
            return Ok(None);
        };

        let mut job = entry.job.clone();
        job.status = JobStatus::Running;
        if job.started_at.is_none() {
            job.started_at = Some(Utc::now());
        }

        if let Err(err) = self.store.save(&job).await {
            // Not committed: put the entry back untouched.
            state.ready.push(entry);
            return Err(err);
        }

        debug!("Dequeued job {} for execution", job.job_id);
        state.active.insert(job.job_id.clone(), job.clone());
        Ok(Some(job))
    }

    /// Move a running job into the completed set, then re-scan the waiting
    /// map and promote every job whose dependencies are now satisfied.
    ///
    /// The re-scan is O(waiting-count) per completion; a reverse index from
    /// dependency id to dependents is the upgrade path if waiting sets grow
    /// large.
    pub async fn mark_complete(&self, job_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let original = state
            .active
            .remove(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;

        let mut job = original.clone();
        job.status = JobStatus::Completed;
        if job.completed_at.is_none() {
            job.completed_at = Some(Utc::now());
        }
        if let Err(err) = self.store.save(&job).await {
            state.active.insert(original.job_id.clone(), original);
            return Err(err);
        }

        info!("Job {} completed", job_id);
        state.completed.insert(job.job_id.clone());

        let promotable: Vec<String> = state
            .waiting
            .values()
            .filter(|waiting| waiting.is_ready(&state.completed))
            .map(|waiting| waiting.job_id.clone())
            .collect();

        for id in promotable {
            if let Some(original) = state.waiting.remove(&id) {
                let mut promoted = original.clone();
                promoted.status = JobStatus::Queued;
                if let Err(err) = self.store.save(&promoted).await {
                    state.waiting.insert(id, original);
                    return Err(err);
                }
                debug!("Promoted job {} (dependencies satisfied)", promoted.job_id);
                state.ready.push(ReadyEntry { job: promoted });
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Terminal failure for a running job. Waiting dependents are cascaded
    /// when `fail_dependents` is enabled.
    pub async fn mark_failed(&self, job_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let original = state
            .active
            .remove(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;

        let mut job = original.clone();
        job.status = JobStatus::Failed;
        if job.completed_at.is_none() {
            job.completed_at = Some(Utc::now());
        }
        if let Err(err) = self.store.save(&job).await {
            state.active.insert(original.job_id.clone(), original);
            return Err(err);
        }

        warn!("Job {} failed terminally", job_id);
        self.fail_waiting_dependents(&mut state, job_id).await
    }

    /// Terminal for the original job; the escalation follow-up is submitted
    /// separately by the caller.
    pub async fn mark_escalated(&self, job_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let original = state
            .active
            .remove(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;

        let mut job = original.clone();
        job.status = JobStatus::Escalated;
        if job.completed_at.is_none() {
            job.completed_at = Some(Utc::now());
        }
        if let Err(err) = self.store.save(&job).await {
            state.active.insert(original.job_id.clone(), original);
            return Err(err);
        }

        info!("Job {} escalated", job_id);
        Ok(())
    }

    /// Requeue a failed execution if retry budget remains; otherwise mark it
    /// failed. Returns whether the job was requeued.
    ///
    /// The original `queued_at` is kept, so a retried job sorts ahead of
    /// same-priority jobs submitted while it was running (intended "fast
    /// retry" behavior).
    pub async fn requeue_for_retry(&self, job_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let original = state
            .active
            .remove(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;

        let mut job = original.clone();
        if job.can_retry() {
            job.retry_count += 1;
            job.status = JobStatus::Retry;
            if let Err(err) = self.store.save(&job).await {
                state.active.insert(original.job_id.clone(), original);
                return Err(err);
            }
            info!(
                "Requeued job {} for retry (attempt {}/{})",
                job_id, job.retry_count, job.max_retries
            );
            state.ready.push(ReadyEntry { job });
            self.notify.notify_waiters();
            Ok(true)
        } else {
            job.status = JobStatus::Failed;
            if job.completed_at.is_none() {
                job.completed_at = Some(Utc::now());
            }
            if let Err(err) = self.store.save(&job).await {
                state.active.insert(original.job_id.clone(), original);
                return Err(err);
            }
            warn!(
                "Job {} exhausted retry budget ({} attempts), marked failed",
                job_id, job.max_retries
            );
            self.fail_waiting_dependents(&mut state, job_id).await?;
            Ok(false)
        }
    }

    /// Cancel a waiting or queued job. Running and terminal jobs are left
    /// untouched (no preemption) and `false` is returned.
    pub async fn cancel(&self, job_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;

        if let Some(original) = state.waiting.remove(job_id) {
            let mut job = original.clone();
            job.status = JobStatus::Cancelled;
            if job.completed_at.is_none() {
                job.completed_at = Some(Utc::now());
            }
            if let Err(err) = self.store.save(&job).await {
                state.waiting.insert(original.job_id.clone(), original);
                return Err(err);
            }
            info!("Cancelled waiting job {}", job_id);
            self.fail_waiting_dependents(&mut state, job_id).await?;
            return Ok(true);
        }

        let in_ready = state
            .ready
            .iter()
            .any(|entry| entry.job.job_id == job_id);
        if in_ready {
            // Heap removal needs a rebuild; cancels are rare enough.
            let entries: Vec<ReadyEntry> = state.ready.drain().collect();
            let mut cancelled = None;
            for entry in entries {
                if entry.job.job_id == job_id {
                    cancelled = Some(entry.job);
                } else {
                    state.ready.push(entry);
                }
            }
            if let Some(original) = cancelled {
                let mut job = original.clone();
                job.status = JobStatus::Cancelled;
                if job.completed_at.is_none() {
                    job.completed_at = Some(Utc::now());
                }
                if let Err(err) = self.store.save(&job).await {
                    state.ready.push(ReadyEntry { job: original });
                    return Err(err);
                }
                info!("Cancelled queued job {}", job_id);
                self.fail_waiting_dependents(&mut state, job_id).await?;
                return Ok(true);
            }
        }

        debug!("Cancel refused for job {} (running, terminal, or unknown)", job_id);
        Ok(false)
    }

    /// Last persisted state of a job; `None` for truly unknown ids.
    pub async fn get_job_status(&self, job_id: &str) -> Result<Option<Job>> {
        self.store.get(job_id).await
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>> {
        self.store.list(status, limit).await
    }

    pub async fn get_stats(&self) -> Result<QueueStats> {
        let jobs_by_status = self.store.counts_by_status().await?;
        let state = self.state.lock().await;
        Ok(QueueStats {
            jobs_by_status,
            ready: state.ready.len(),
            waiting: state.waiting.len(),
            active: state.active.len(),
            completed: state.completed.len(),
        })
    }

    /// Reload persisted queued/waiting/retry rows after a restart, then
    /// re-derive ready vs. waiting membership against an empty completed
    /// set. Rows orphaned in `running` by a force shutdown are reset to
    /// queued first. Returns the number of jobs reloaded.
    pub async fn recover(&self) -> Result<usize> {
        let orphaned = self.store.reset_running_to_queued().await?;
        if orphaned > 0 {
            warn!("Reset {} orphaned running job(s) back to queued", orphaned);
        }

        let pending = self.store.load_pending().await?;
        let mut state = self.state.lock().await;
        let mut recovered = 0;

        for mut job in pending {
            let ready = job.is_ready(&state.completed);
            let target_status = if ready {
                // Keep `retry` visible as such; anything else re-enters queued.
                if job.status == JobStatus::Retry {
                    JobStatus::Retry
                } else {
                    JobStatus::Queued
                }
            } else {
                JobStatus::Waiting
            };

            if job.status != target_status {
                job.status = target_status;
                self.store.save(&job).await?;
            }

            if ready {
                state.ready.push(ReadyEntry { job });
            } else {
                state.waiting.insert(job.job_id.clone(), job);
            }
            recovered += 1;
        }

        if recovered > 0 {
            info!("Recovered {} pending job(s) from the mirror store", recovered);
            self.notify.notify_waiters();
        }
        Ok(recovered)
    }

    /// Transitively fail waiting jobs that depend on a job which just
    /// reached `Failed` or `Cancelled`, instead of letting them starve.
    async fn fail_waiting_dependents(
        &self,
        state: &mut QueueState,
        root_id: &str,
    ) -> Result<()> {
        if !self.fail_dependents {
            return Ok(());
        }

        let mut frontier = vec![root_id.to_string()];
        while let Some(dead) = frontier.pop() {
            let dependents: Vec<String> = state
                .waiting
                .values()
                .filter(|job| job.depends_on.contains(&dead))
                .map(|job| job.job_id.clone())
                .collect();

            for id in dependents {
                if let Some(original) = state.waiting.remove(&id) {
                    let mut job = original.clone();
                    job.status = JobStatus::Failed;
                    job.completed_at = Some(Utc::now());
                    job.metadata
                        .insert("failed_dependency".to_string(), dead.clone());
                    if let Err(err) = self.store.save(&job).await {
                        state.waiting.insert(id, original);
                        return Err(err);
                    }
                    warn!("Job {} failed: dependency {} will never complete", id, dead);
                    frontier.push(id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobPriority;
    use crate::storage::SqliteJobStore;
    use serde_json::json;

    async fn test_queue() -> JobQueue {
        let store = SqliteJobStore::connect("sqlite::memory:").await.unwrap();
        JobQueue::new(Arc::new(store), true)
    }

    fn job(id: &str, priority: JobPriority) -> Job {
        Job::new(
            id,
            Some("lint".to_string()),
            json!({"job_id": id, "tool": "lint"}),
            priority,
            2,
        )
    }

    async fn next_id(queue: &JobQueue) -> Option<String> {
        queue
            .get_next(Duration::from_millis(10))
            .await
            .unwrap()
            .map(|j| j.job_id)
    }

    #[tokio::test]
    async fn test_priority_ordering_with_fifo_tie_break() {
        let queue = test_queue().await;

        let mut low = job("low", JobPriority::Low);
        let mut normal_1 = job("normal-1", JobPriority::Normal);
        let mut normal_2 = job("normal-2", JobPriority::Normal);
        let mut critical = job("critical", JobPriority::Critical);
        let mut high = job("high", JobPriority::High);

        // Force distinct, known submission times.
        let base = Utc::now();
        low.queued_at = base;
        normal_1.queued_at = base + chrono::Duration::milliseconds(1);
        normal_2.queued_at = base + chrono::Duration::milliseconds(2);
        critical.queued_at = base + chrono::Duration::milliseconds(3);
        high.queued_at = base + chrono::Duration::milliseconds(4);

        for j in [low, normal_1, normal_2, critical, high] {
            queue.submit(j).await.unwrap();
        }

        assert_eq!(next_id(&queue).await.as_deref(), Some("critical"));
        assert_eq!(next_id(&queue).await.as_deref(), Some("high"));
        assert_eq!(next_id(&queue).await.as_deref(), Some("normal-1"));
        assert_eq!(next_id(&queue).await.as_deref(), Some("normal-2"));
        assert_eq!(next_id(&queue).await.as_deref(), Some("low"));
        assert_eq!(next_id(&queue).await, None);
    }

    #[tokio::test]
    async fn test_dequeue_sets_running_and_started_at() {
        let queue = test_queue().await;
        queue.submit(job("a", JobPriority::Normal)).await.unwrap();

        let claimed = queue
            .get_next(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(claimed.started_at.is_some());

        let persisted = queue.get_job_status("a").await.unwrap().unwrap();
        assert_eq!(persisted.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_dependency_gating() {
        let queue = test_queue().await;
        queue.submit(job("a", JobPriority::Normal)).await.unwrap();
        queue.submit(job("b", JobPriority::Normal)).await.unwrap();
        queue
            .submit(
                job("c", JobPriority::Critical)
                    .with_dependencies(["a".to_string(), "b".to_string()]),
            )
            .await
            .unwrap();

        // c is waiting despite its priority.
        let first = next_id(&queue).await.unwrap();
        let second = next_id(&queue).await.unwrap();
        assert_eq!(next_id(&queue).await, None);

        queue.mark_complete(&first).await.unwrap();
        assert_eq!(next_id(&queue).await, None);

        queue.mark_complete(&second).await.unwrap();
        assert_eq!(next_id(&queue).await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_dependency_on_already_completed_job() {
        let queue = test_queue().await;
        queue.submit(job("a", JobPriority::Normal)).await.unwrap();
        let a = next_id(&queue).await.unwrap();
        queue.mark_complete(&a).await.unwrap();

        queue
            .submit(job("b", JobPriority::Normal).with_dependencies(["a".to_string()]))
            .await
            .unwrap();
        assert_eq!(next_id(&queue).await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion() {
        let queue = test_queue().await;
        queue.submit(job("a", JobPriority::Normal)).await.unwrap();

        // max_retries = 2: two requeues succeed, the third fails the job.
        for expected_attempt in 1..=2u32 {
            let claimed = queue
                .get_next(Duration::from_millis(10))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(claimed.retry_count, expected_attempt - 1);
            assert!(queue.requeue_for_retry(&claimed.job_id).await.unwrap());
        }

        let claimed = queue
            .get_next(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.retry_count, 2);
        assert!(!queue.requeue_for_retry(&claimed.job_id).await.unwrap());

        let persisted = queue.get_job_status("a").await.unwrap().unwrap();
        assert_eq!(persisted.status, JobStatus::Failed);
        assert_eq!(persisted.retry_count, 2);
        assert_eq!(next_id(&queue).await, None);
    }

    #[tokio::test]
    async fn test_fast_retry_keeps_original_queue_position() {
        let queue = test_queue().await;
        queue.submit(job("first", JobPriority::Normal)).await.unwrap();

        let claimed = queue
            .get_next(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        // A same-priority job arrives while `first` is running.
        queue.submit(job("second", JobPriority::Normal)).await.unwrap();
        queue.requeue_for_retry(&claimed.job_id).await.unwrap();

        // The retried job keeps its original queued_at and jumps ahead.
        assert_eq!(next_id(&queue).await.as_deref(), Some("first"));
        assert_eq!(next_id(&queue).await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_cancel_waiting_and_queued_but_not_running() {
        let queue = test_queue().await;
        queue.submit(job("running", JobPriority::Normal)).await.unwrap();
        queue.submit(job("queued", JobPriority::Low)).await.unwrap();
        queue
            .submit(job("waiting", JobPriority::Normal).with_dependencies(["x".to_string()]))
            .await
            .unwrap();

        let claimed = queue
            .get_next(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.job_id, "running");

        assert!(queue.cancel("waiting").await.unwrap());
        assert!(queue.cancel("queued").await.unwrap());
        assert!(!queue.cancel("running").await.unwrap());
        assert!(!queue.cancel("nonexistent").await.unwrap());

        let running = queue.get_job_status("running").await.unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);
        let cancelled = queue.get_job_status("queued").await.unwrap().unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        // Cancelled jobs never come out of get_next.
        assert_eq!(next_id(&queue).await, None);
    }

    #[tokio::test]
    async fn test_cascade_failure_of_dependents() {
        let queue = test_queue().await;
        queue.submit(job("root", JobPriority::Normal)).await.unwrap();
        queue
            .submit(job("child", JobPriority::Normal).with_dependencies(["root".to_string()]))
            .await
            .unwrap();
        queue
            .submit(
                job("grandchild", JobPriority::Normal)
                    .with_dependencies(["child".to_string()]),
            )
            .await
            .unwrap();

        let claimed = queue
            .get_next(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        queue.mark_failed(&claimed.job_id).await.unwrap();

        let child = queue.get_job_status("child").await.unwrap().unwrap();
        assert_eq!(child.status, JobStatus::Failed);
        assert_eq!(
            child.metadata.get("failed_dependency").map(String::as_str),
            Some("root")
        );

        let grandchild = queue.get_job_status("grandchild").await.unwrap().unwrap();
        assert_eq!(grandchild.status, JobStatus::Failed);
        assert_eq!(next_id(&queue).await, None);
    }

    #[tokio::test]
    async fn test_starvation_without_cascade() {
        let store = SqliteJobStore::connect("sqlite::memory:").await.unwrap();
        let queue = JobQueue::new(Arc::new(store), false);

        queue.submit(job("root", JobPriority::Normal)).await.unwrap();
        queue
            .submit(job("child", JobPriority::Normal).with_dependencies(["root".to_string()]))
            .await
            .unwrap();

        let claimed = queue
            .get_next(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        queue.mark_failed(&claimed.job_id).await.unwrap();

        // Base behavior: the dependent stays waiting forever.
        let child = queue.get_job_status("child").await.unwrap().unwrap();
        assert_eq!(child.status, JobStatus::Waiting);
        assert_eq!(next_id(&queue).await, None);
    }

    #[tokio::test]
    async fn test_mark_escalated_is_terminal() {
        let queue = test_queue().await;
        queue.submit(job("a", JobPriority::Normal)).await.unwrap();
        let claimed = queue
            .get_next(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        queue.mark_escalated(&claimed.job_id).await.unwrap();
        let persisted = queue.get_job_status("a").await.unwrap().unwrap();
        assert_eq!(persisted.status, JobStatus::Escalated);
        assert!(persisted.completed_at.is_some());
        assert_eq!(next_id(&queue).await, None);
    }

    #[tokio::test]
    async fn test_mark_complete_unknown_job_errors() {
        let queue = test_queue().await;
        let err = queue.mark_complete("ghost").await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stats_reflect_structures_and_rows() {
        let queue = test_queue().await;
        queue.submit(job("a", JobPriority::Normal)).await.unwrap();
        queue.submit(job("b", JobPriority::Normal)).await.unwrap();
        queue
            .submit(job("c", JobPriority::Normal).with_dependencies(["a".to_string()]))
            .await
            .unwrap();

        let claimed = queue
            .get_next(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        let stats = queue.get_stats().await.unwrap();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.waiting, 1);
        assert_eq!(stats.jobs_by_status.get("running"), Some(&1));
        assert_eq!(stats.jobs_by_status.get("queued"), Some(&1));
        assert_eq!(stats.jobs_by_status.get("waiting"), Some(&1));

        queue.mark_complete(&claimed.job_id).await.unwrap();
        let stats = queue.get_stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.jobs_by_status.get("completed"), Some(&1));
    }

    #[tokio::test]
    async fn test_get_next_timeout_returns_none() {
        let queue = test_queue().await;
        let started = std::time::Instant::now();
        let result = queue.get_next(Duration::from_millis(30)).await.unwrap();
        assert!(result.is_none());
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_restart_recovery_preserves_relative_order() {
        let store = Arc::new(SqliteJobStore::connect("sqlite::memory:").await.unwrap());

        {
            let queue = JobQueue::new(store.clone(), true);
            let mut low = job("low", JobPriority::Low);
            let mut high = job("high", JobPriority::High);
            let mut normal = job("normal", JobPriority::Normal);
            let base = Utc::now();
            low.queued_at = base;
            high.queued_at = base + chrono::Duration::milliseconds(1);
            normal.queued_at = base + chrono::Duration::milliseconds(2);

            queue.submit(low).await.unwrap();
            queue.submit(high).await.unwrap();
            queue.submit(normal).await.unwrap();
            queue
                .submit(job("blocked", JobPriority::Critical).with_dependencies([
                    "high".to_string(),
                ]))
                .await
                .unwrap();
            // Simulate a force shutdown mid-execution.
            let claimed = queue
                .get_next(Duration::from_millis(10))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(claimed.job_id, "high");
        }

        // "Restart": fresh queue over the same store.
        let queue = JobQueue::new(store, true);
        let recovered = queue.recover().await.unwrap();
        assert_eq!(recovered, 4);

        // `high` was orphaned running and comes back queued; `blocked`
        // re-derives waiting against the empty completed set.
        assert_eq!(next_id(&queue).await.as_deref(), Some("high"));
        queue.mark_complete("high").await.unwrap();
        assert_eq!(next_id(&queue).await.as_deref(), Some("blocked"));
        assert_eq!(next_id(&queue).await.as_deref(), Some("normal"));
        assert_eq!(next_id(&queue).await.as_deref(), Some("low"));
    }

    #[tokio::test]
    async fn test_recovery_keeps_retry_status_visible() {
        let store = Arc::new(SqliteJobStore::connect("sqlite::memory:").await.unwrap());
        let mut retrying = job("r", JobPriority::Normal);
        retrying.status = JobStatus::Retry;
        retrying.retry_count = 1;
        store.save(&retrying).await.unwrap();

        let queue = JobQueue::new(store, true);
        assert_eq!(queue.recover().await.unwrap(), 1);

        let claimed = queue
            .get_next(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.job_id, "r");
        assert_eq!(claimed.retry_count, 1);
    }
}
