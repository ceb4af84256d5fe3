//! Error types for the workflow engine
//!
//! Failures inside the engine are values: executors and registries return
//! `Result<_, EngineError>` and the job manager records the error on the job.
//! Only invariant violations are allowed to panic.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur across the workflow engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Definition failed structural or semantic validation
    #[error("validation failed: {0}")]
    Validation(String),

    /// A registry lookup missed
    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },

    /// A task raised during execution
    #[error("task '{task_id}' failed: {message}")]
    Task { task_id: String, message: String },

    /// Execution failed outside any single task
    #[error("execution failed: {0}")]
    Execution(String),

    /// Deadline exceeded
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// Cooperative cancellation was observed
    ///
    /// Carries the partial results map (DAG) or last observed state (graph)
    /// for debugging; the job's `result` stays null.
    #[error("execution cancelled")]
    Cancelled { partial: Option<Value> },

    /// Graph execution exceeded its iteration bound
    #[error("iteration limit reached: {0} iterations")]
    IterationLimit(usize),

    /// Submission refused because the queue is at capacity
    #[error("job queue is full (limit {0})")]
    QueueFull(usize),

    /// Checkpoint missing or the job is not paused
    #[error("resume failed: {0}")]
    Resume(String),

    /// Template parameter without a default was not supplied
    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    /// Template parameter value has the wrong JSON type
    #[error("parameter '{name}' expects {expected}")]
    InvalidParameterType { name: String, expected: String },

    /// Webhook delivery exhausted its retries or hit a permanent failure
    #[error("webhook delivery failed: {0}")]
    Webhook(String),
}

/// Resource kinds used by `EngineError::NotFound`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Workflow,
    Graph,
    Template,
    Job,
    Checkpoint,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::Workflow => "workflow",
            ResourceKind::Graph => "graph",
            ResourceKind::Template => "template",
            ResourceKind::Job => "job",
            ResourceKind::Checkpoint => "checkpoint",
        };
        write!(f, "{}", name)
    }
}

impl EngineError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a task error
    pub fn task(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Task {
            task_id: task_id.into(),
            message: message.into(),
        }
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Create a cancellation error without partial results
    pub fn cancelled() -> Self {
        Self::Cancelled { partial: None }
    }

    /// Create a resume error
    pub fn resume(message: impl Into<String>) -> Self {
        Self::Resume(message.into())
    }

    /// Check if the error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout(_))
    }

    /// Check if the error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled { .. })
    }

    /// Check if the error is a validation failure
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::MissingParameter(_)
                | EngineError::InvalidParameterType { .. }
        )
    }

    /// Process exit code for CLI wrappers
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Validation(_)
            | EngineError::MissingParameter(_)
            | EngineError::InvalidParameterType { .. } => 2,
            EngineError::NotFound { .. } => 3,
            EngineError::Timeout(_) => 4,
            EngineError::Cancelled { .. } => 5,
            _ => 1,
        }
    }
}
