//! Job records and lifecycle state machine
//!
//! A job is one scheduled execution of a workflow or graph. Status only
//! advances along the state machine: PENDING -> RUNNING -> terminal, with
//! PAUSED reachable from RUNNING for graph jobs awaiting human input.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::dag::Progress;
use crate::definition::WorkflowDefinition;

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl JobStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Timeout
        )
    }

    /// Whether moving to `next` follows the state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Pending, JobStatus::Cancelled) => true,
            (JobStatus::Running, JobStatus::Completed)
            | (JobStatus::Running, JobStatus::Failed)
            | (JobStatus::Running, JobStatus::Cancelled)
            | (JobStatus::Running, JobStatus::Timeout)
            | (JobStatus::Running, JobStatus::Paused) => true,
            (JobStatus::Paused, JobStatus::Running) => true,
            // Pausing and cancelling race at the paused boundary
            (JobStatus::Paused, JobStatus::Cancelled) => true,
            _ => false,
        }
    }

    /// Uppercase wire name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Paused => "PAUSED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job priority. Strict order: high > normal > low.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Webhook HTTP method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookMethod {
    #[default]
    #[serde(rename = "POST")]
    Post,
    #[serde(rename = "PUT")]
    Put,
}

/// Webhook configuration attached to a job at submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,

    #[serde(default)]
    pub method: WebhookMethod,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// What a job executes.
#[derive(Debug, Clone)]
pub enum WorkflowRef {
    /// A registered workflow id (pre-built or custom)
    Workflow(String),
    /// An inline definition submitted with the job
    Inline(Box<WorkflowDefinition>),
    /// A registered graph id
    Graph(String),
}

impl WorkflowRef {
    /// Display id recorded on the job.
    pub fn display_id(&self) -> String {
        match self {
            WorkflowRef::Workflow(id) => id.clone(),
            WorkflowRef::Inline(def) => def.name.clone(),
            WorkflowRef::Graph(id) => id.clone(),
        }
    }
}

/// A scheduled execution with lifecycle state.
///
/// Serialize-only: jobs are engine-owned and flow outward through status
/// queries, never inward.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,

    pub workflow_id: String,

    /// Stats bucket: "pre-built", "custom", "inline", or "graph"
    pub workflow_type: String,

    #[serde(skip_serializing)]
    pub workflow_ref: WorkflowRef,

    #[serde(skip_serializing)]
    pub inputs: Map<String, Value>,

    pub priority: JobPriority,

    #[serde(skip_serializing)]
    pub webhook: Option<WebhookConfig>,

    pub status: JobStatus,

    pub progress: Progress,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Set while a graph job is paused awaiting human input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,

    /// Prompt for the human while the job is paused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_prompt: Option<String>,

    /// Graph state at the pause point, for pollers driving the resume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_state: Option<Value>,
}

impl Job {
    pub fn new(
        workflow_ref: WorkflowRef,
        workflow_type: String,
        inputs: Map<String, Value>,
        priority: JobPriority,
        webhook: Option<WebhookConfig>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_ref.display_id(),
            workflow_type,
            workflow_ref,
            inputs,
            priority,
            webhook,
            status: JobStatus::Pending,
            progress: Progress::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            execution_time_ms: None,
            result: None,
            error: None,
            checkpoint_id: None,
            human_prompt: None,
            paused_state: None,
        }
    }

    /// Advance the state machine, stamping timestamps.
    ///
    /// Returns false (and leaves the job untouched) on an illegal
    /// transition; that indicates a bug in the caller.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(job_id = %self.id, from = %self.status, to = %next, "illegal job transition refused");
            debug_assert!(false, "illegal job transition {} -> {}", self.status, next);
            return false;
        }

        let now = Utc::now();
        match next {
            JobStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            s if s.is_terminal() => {
                self.completed_at = Some(now);
                if let Some(started) = self.started_at {
                    self.execution_time_ms =
                        Some((now - started).num_milliseconds().max(0) as u64);
                }
            }
            _ => {}
        }
        self.status = next;
        true
    }
}
