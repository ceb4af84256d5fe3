//! External task executor boundary
//!
//! The engine holds no domain knowledge about what a task does. Everything
//! concrete (PDF extraction, chunking, LLM calls, registered functions)
//! lives behind [`TaskExecutor`]. Executors dispatch by opaque type or
//! function name and hand back JSON.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors surfaced by a task executor.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task ran and failed
    #[error("{0}")]
    Failed(String),

    /// The task type is not in the executor's registry
    #[error("unknown task type: {0}")]
    UnknownType(String),

    /// The named function is not registered
    #[error("unknown function: {0}")]
    UnknownFunction(String),
}

impl TaskError {
    /// Create a failure with a message
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in an agent conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Request for an agent-node completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    /// Tool names the model may call
    pub tools: Vec<String>,
}

/// Response from an agent-node completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Plain-text reply
    pub content: String,
    /// Tool invocations the model requested, possibly empty
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    /// A plain text response with no tool calls
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// The boundary between the engine and concrete task implementations.
///
/// DAG tasks go through [`run_task`](TaskExecutor::run_task); graph agent
/// nodes through [`complete_chat`](TaskExecutor::complete_chat); graph tool
/// nodes and agent tool calls through
/// [`call_function`](TaskExecutor::call_function).
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run one workflow task of the given type with resolved inputs.
    async fn run_task(
        &self,
        task_type: &str,
        inputs: Map<String, Value>,
    ) -> Result<Value, TaskError>;

    /// Produce a model completion for an agent node.
    async fn complete_chat(&self, request: ChatRequest) -> Result<ChatResponse, TaskError>;

    /// Invoke a registered function by name.
    async fn call_function(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value, TaskError>;
}
