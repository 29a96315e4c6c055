//! Queue configuration
//!
//! Plain serde structs with sensible defaults; the embedding application
//! decides where the values come from (file, env, flags). `from_env` covers
//! the two knobs operators most commonly override.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::escalation::EscalationRule;
use crate::retry::{BackoffStrategy, RetryPolicy};

/// Retry knobs in config-friendly units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub strategy: BackoffStrategy,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: BackoffStrategy::Exponential,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            strategy: self.strategy,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Top-level configuration for the queue core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// SQLite database URL for the persistence mirror.
    pub database_url: String,
    /// Number of concurrent worker loops.
    pub worker_count: usize,
    /// Bound on each worker's cooperative dequeue wait, so shutdown is
    /// observed promptly. Not a job timeout.
    pub poll_timeout_ms: u64,
    /// Fail waiting dependents of a failed/cancelled job instead of letting
    /// them starve.
    pub fail_dependents: bool,
    /// Retry budget and backoff curve. Jobs built through the manager take
    /// `max_retries` from here, keeping the policy and per-job budgets in
    /// sync.
    pub retry: RetrySettings,
    /// Per-tool escalation rule table.
    pub escalation_rules: HashMap<String, EscalationRule>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://toolqueue.db".to_string(),
            worker_count: 4,
            poll_timeout_ms: 250,
            fail_dependents: true,
            retry: RetrySettings::default(),
            escalation_rules: HashMap::new(),
        }
    }
}

impl QueueConfig {
    /// Defaults with `TOOLQUEUE_DATABASE_URL` and `TOOLQUEUE_WORKERS`
    /// overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("TOOLQUEUE_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(workers) = std::env::var("TOOLQUEUE_WORKERS")
            .ok()
            .and_then(|value| value.parse().ok())
        {
            config.worker_count = workers;
        }
        config
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}
