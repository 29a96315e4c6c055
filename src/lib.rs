//! toolqueue - scheduling core for dev-tool automation
//!
//! A priority-ordered, dependency-aware job queue with a concurrent worker
//! pool, configurable retry backoff, rule-driven escalation between tools,
//! and a SQLite persistence mirror for process-restart recovery.
//!
//! Dispatch is at-least-once with caller-visible retry bookkeeping; the
//! actual execution of a job payload belongs to an injected [`worker::Orchestrator`].

pub mod config;
pub mod domain;
pub mod error;
pub mod escalation;
pub mod logging;
pub mod manager;
pub mod queue;
pub mod retry;
pub mod storage;
pub mod worker;

// Re-export commonly used types
pub use config::QueueConfig;
pub use domain::{Job, JobPriority, JobStatus};
pub use error::{QueueError, Result};
pub use manager::QueueManager;
