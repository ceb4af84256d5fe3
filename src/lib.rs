//! vellum-workflows: a workflow execution engine
//!
//! Accepts declarative workflow definitions (acyclic task graphs, pre-built
//! templates, and stateful cyclic graphs), validates them, and executes them
//! either synchronously or as managed background jobs with priorities,
//! cancellation, webhooks, and progress tracking.
//!
//! The engine holds no domain knowledge: concrete task implementations live
//! behind the [`task::TaskExecutor`] trait supplied by the embedder.
//!
//! # Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use vellum_workflows::WorkflowEngine;
//!
//! let engine = WorkflowEngine::new(Arc::new(MyTaskExecutor::new()));
//! let result = engine.execute("pdf-extract-and-chunk", inputs).await?;
//! ```

pub mod dag;
pub mod definition;
pub mod engine;
pub mod error;
pub mod graph;
pub mod jobs;
pub mod reference;
pub mod task;
pub mod template;
pub mod validate;

// Re-exports for convenience
pub use dag::{DagExecutor, Progress, ProgressFn};
pub use definition::{TaskDefinition, WorkflowDefinition, WorkflowOptions};
pub use engine::{EngineCore, InstantiatedTemplate, WorkflowEngine};
pub use error::{EngineError, ResourceKind};
pub use graph::{
    Checkpoint, CheckpointStore, GraphDefinition, GraphExecutor, GraphOutcome, GraphState,
    MemoryCheckpointStore, NodeKind, RoutingRule, END,
};
pub use jobs::job::{Job, JobPriority, JobStatus, WebhookConfig, WebhookMethod, WorkflowRef};
pub use jobs::{
    JobDispatcher, JobFilter, JobManager, JobManagerConfig, JobOutcome, JobStats, SubmitRequest,
};
pub use task::{ChatMessage, ChatRequest, ChatResponse, Role, TaskError, TaskExecutor, ToolCall};
pub use template::{Template, TemplateInfo, TemplateParameter, TemplateRegistry};
pub use validate::{validate_graph, validate_workflow, Validation};
