//! Job entity and lifecycle model
//!
//! A job is the unit of work handed to the queue: an opaque payload for the
//! external orchestrator plus the scheduling metadata (priority, status,
//! dependencies, retry budget, timestamps) this core operates on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{QueueError, Result};

/// Job priority class; lower ordinal is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl JobPriority {
    pub fn ordinal(self) -> u8 {
        match self {
            JobPriority::Critical => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(JobPriority::Critical),
            1 => Some(JobPriority::High),
            2 => Some(JobPriority::Normal),
            3 => Some(JobPriority::Low),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobPriority::Critical => "critical",
            JobPriority::High => "high",
            JobPriority::Normal => "normal",
            JobPriority::Low => "low",
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle status.
///
/// Terminal statuses admit no further transitions; `Retry` is transient and
/// immediately re-enters the ready structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Waiting,
    Running,
    Completed,
    Failed,
    Retry,
    Escalated,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Waiting => "waiting",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retry => "retry",
            JobStatus::Escalated => "escalated",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "waiting" => Ok(JobStatus::Waiting),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "retry" => Ok(JobStatus::Retry),
            "escalated" => Ok(JobStatus::Escalated),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(QueueError::ValidationError(format!(
                "Unknown job status: {}",
                other
            ))),
        }
    }

    /// Escalated is terminal for the original job; the escalation job is a
    /// fresh submission with its own lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Escalated | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The queued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Caller-supplied, globally unique id. Re-submitting the same id
    /// overwrites the persisted row.
    pub job_id: String,
    /// Tool name used for escalation rule lookup; never interpreted
    /// otherwise.
    pub tool: Option<String>,
    /// Opaque payload forwarded verbatim to the orchestrator.
    pub payload: Value,
    pub priority: JobPriority,
    pub status: JobStatus,
    /// Ids that must reach `Completed` before this job may be dequeued.
    pub depends_on: HashSet<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Free-form annotations (escalation provenance, custom tags).
    pub metadata: HashMap<String, String>,
}

impl Job {
    pub fn new(
        job_id: impl Into<String>,
        tool: Option<String>,
        payload: Value,
        priority: JobPriority,
        max_retries: u32,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            tool,
            payload,
            priority,
            status: JobStatus::Queued,
            depends_on: HashSet::new(),
            retry_count: 0,
            max_retries,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_dependencies(mut self, depends_on: impl IntoIterator<Item = String>) -> Self {
        self.depends_on = depends_on.into_iter().collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build a job from a submission payload.
    ///
    /// The payload must carry a string `job_id`; its absence is a caller
    /// error rejected before anything enters the queue. An optional `tool`
    /// field feeds escalation rule lookup.
    pub fn from_payload(
        payload: Value,
        priority: JobPriority,
        depends_on: Vec<String>,
        max_retries: u32,
    ) -> Result<Self> {
        if !payload.is_object() {
            return Err(QueueError::ValidationError(
                "Job payload must be a JSON object".to_string(),
            ));
        }

        let job_id = payload
            .get("job_id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                QueueError::ValidationError(
                    "Job payload is missing required string field `job_id`".to_string(),
                )
            })?;

        let tool = payload
            .get("tool")
            .and_then(Value::as_str)
            .map(str::to_owned);

        Ok(Self::new(job_id, tool, payload, priority, max_retries).with_dependencies(depends_on))
    }

    /// A job is ready once every dependency id is in the completed-id set.
    /// Readiness is evaluated against the set, not the dependency objects,
    /// so ids that never complete keep the job waiting.
    pub fn is_ready(&self, completed: &HashSet<String>) -> bool {
        self.depends_on.iter().all(|dep| completed.contains(dep))
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
