//! Failure escalation between tools
//!
//! When a job keeps failing, an escalation rule can promote it to a
//! different tool instead of burning the rest of its retry budget. Rules
//! form a directed graph over tool names; chain walks are cut off as soon
//! as a tool repeats.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::domain::{Job, JobPriority};

/// Why a job is being considered for escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationReason {
    Failure,
    Timeout,
}

impl EscalationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EscalationReason::Failure => "failure",
            EscalationReason::Timeout => "timeout",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tool escalation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRule {
    /// Target tool when the job fails outright.
    #[serde(default)]
    pub on_failure: Option<String>,
    /// Target tool when the job times out.
    #[serde(default)]
    pub on_timeout: Option<String>,
    /// Retries the job must have burned before escalation is offered.
    #[serde(default)]
    pub max_retries_before_escalation: u32,
    /// Priority assigned to the escalated job.
    #[serde(default = "default_escalate_priority")]
    pub escalate_priority: JobPriority,
}

fn default_escalate_priority() -> JobPriority {
    JobPriority::High
}

/// Payload rewrite applied when handing a job from one tool to another.
pub type PayloadTransform = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Decides whether a failed job escalates and synthesizes the follow-up job.
pub struct EscalationManager {
    rules: HashMap<String, EscalationRule>,
    transforms: HashMap<(String, String), PayloadTransform>,
}

impl EscalationManager {
    pub fn new(rules: HashMap<String, EscalationRule>) -> Self {
        let mut manager = Self {
            rules,
            transforms: HashMap::new(),
        };
        // Built-in rewrite: lint failures hand their command to llm-review
        // as a suggestion request.
        manager.register_transform("lint", "llm-review", Arc::new(lint_to_review));
        manager
    }

    /// Register a payload transform for a (source_tool, target_tool) pair.
    /// New tool pairs plug in here without touching the manager core.
    pub fn register_transform(
        &mut self,
        source_tool: impl Into<String>,
        target_tool: impl Into<String>,
        transform: PayloadTransform,
    ) {
        self.transforms
            .insert((source_tool.into(), target_tool.into()), transform);
    }

    pub fn rule_for(&self, tool: &str) -> Option<&EscalationRule> {
        self.rules.get(tool)
    }

    fn target_for(&self, tool: &str, reason: EscalationReason) -> Option<&str> {
        let rule = self.rules.get(tool)?;
        match reason {
            EscalationReason::Failure => rule.on_failure.as_deref(),
            EscalationReason::Timeout => rule.on_timeout.as_deref(),
        }
    }

    /// True when the job's tool has a rule, the rule names a target for this
    /// reason, and the job has burned at least the threshold of retries.
    pub fn should_escalate(&self, job: &Job, reason: EscalationReason) -> bool {
        let Some(tool) = job.tool.as_deref() else {
            return false;
        };
        let Some(rule) = self.rules.get(tool) else {
            return false;
        };
        if self.target_for(tool, reason).is_none() {
            return false;
        }
        job.retry_count >= rule.max_retries_before_escalation
    }

    /// Build the follow-up job targeting the escalation tool.
    ///
    /// The escalated job never waits on dependencies and starts with a fresh
    /// retry count; its metadata records the original job id and the reason.
    /// Returns `None` when no rule applies (callers normally gate on
    /// `should_escalate` first).
    pub fn create_escalation_job(&self, job: &Job, reason: EscalationReason) -> Option<Job> {
        let tool = job.tool.as_deref()?;
        let target = self.target_for(tool, reason)?.to_string();
        let rule = self.rule_for(tool)?;

        let payload = match self.transforms.get(&(tool.to_string(), target.clone())) {
            Some(transform) => transform(&job.payload),
            None => retarget_payload(&job.payload, &target),
        };

        let mut escalated = Job::new(
            format!("{}-escalated-{}", job.job_id, target),
            Some(target.clone()),
            payload,
            rule.escalate_priority,
            job.max_retries,
        );
        escalated.metadata = job.metadata.clone();
        escalated
            .metadata
            .insert("escalated_from".to_string(), job.job_id.clone());
        escalated
            .metadata
            .insert("escalation_reason".to_string(), reason.as_str().to_string());

        info!(
            "Escalating job {} from {} to {} ({})",
            job.job_id, tool, target, reason
        );
        Some(escalated)
    }

    /// Walk `on_failure` targets from a tool, starting tool included.
    /// Stops when a target is unset or a tool repeats (cycle guard).
    pub fn get_escalation_chain(&self, tool: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = tool.to_string();

        loop {
            if !seen.insert(current.clone()) {
                break;
            }
            chain.push(current.clone());
            match self
                .rules
                .get(&current)
                .and_then(|rule| rule.on_failure.clone())
            {
                Some(next) => current = next,
                None => break,
            }
        }
        chain
    }
}

/// Default transform: forward the payload, retargeting its `tool` field.
fn retarget_payload(payload: &Value, target: &str) -> Value {
    let mut payload = payload.clone();
    if let Some(object) = payload.as_object_mut() {
        object.insert("tool".to_string(), Value::String(target.to_string()));
    }
    payload
}

/// Rewrite a lint command payload into llm-review's suggestion-request
/// format: the original command and output become review context.
fn lint_to_review(payload: &Value) -> Value {
    json!({
        "tool": "llm-review",
        "mode": "suggest",
        "request": {
            "original_command": payload.get("command").cloned().unwrap_or(Value::Null),
            "source_payload": payload.clone(),
        },
    })
}
