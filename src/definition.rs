//! Declarative workflow definitions
//!
//! A workflow is a directed acyclic graph of tasks. Task inputs may be
//! literal JSON values or `{{...}}` reference strings resolved at launch
//! against the workflow inputs and prior task outputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Definition of a single task in a workflow.
///
/// `task_type` is opaque to the engine; it is matched against the external
/// task executor's registry at run time, never validated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique task identifier within the workflow
    pub id: String,

    /// Task kind, dispatched to the external task executor
    #[serde(rename = "type")]
    pub task_type: String,

    /// Input parameters; values may be literals or reference strings
    #[serde(default)]
    pub inputs: Map<String, Value>,

    /// Task ids that must complete before this task starts
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Output keys this task is expected to produce (informational only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,

    /// Extra retry attempts on failure; overrides the workflow default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,

    /// Per-task timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Workflow execution options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowOptions {
    /// Run tasks within a dependency layer concurrently
    #[serde(default)]
    pub parallel: bool,

    /// Enable the workflow-level retry default for failed tasks
    #[serde(default)]
    pub retry_failed_tasks: bool,

    /// Overall workflow timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Workflow-level default for extra retry attempts per task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Fail fast on unresolved references instead of passing null through
    #[serde(default)]
    pub strict_references: bool,
}

/// Complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Ordered task definitions
    pub tasks: Vec<TaskDefinition>,

    /// External output name -> reference string
    #[serde(default)]
    pub output: BTreeMap<String, String>,

    #[serde(default)]
    pub options: WorkflowOptions,

    /// Free-form metadata (tags, author, source template)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl WorkflowDefinition {
    /// Look up a task by id.
    pub fn task(&self, id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Extra retry attempts allowed for a task.
    ///
    /// The task's own `retry` wins; otherwise the workflow-level
    /// `max_retries` applies when `retry_failed_tasks` is set.
    pub fn retries_for(&self, task: &TaskDefinition) -> u32 {
        task.retry
            .or_else(|| {
                if self.options.retry_failed_tasks {
                    self.options.max_retries
                } else {
                    None
                }
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_task_definition() -> WorkflowDefinition {
        serde_json::from_value(json!({
            "name": "pdf-extract-and-chunk",
            "version": "1.0.0",
            "tasks": [
                {
                    "id": "extract",
                    "type": "extract_pdf_text",
                    "inputs": {"pdf_data": "{{workflow.input.pdf_data}}"}
                },
                {
                    "id": "chunk",
                    "type": "chunk_document",
                    "depends_on": ["extract"],
                    "inputs": {"content": "{{extract.text}}", "chunk_size": 1000}
                }
            ],
            "output": {"chunks": "{{chunk.chunks}}"},
            "options": {"parallel": false, "timeout_ms": 300000}
        }))
        .unwrap()
    }

    #[test]
    fn test_deserialize_definition() {
        let def = two_task_definition();
        assert_eq!(def.name, "pdf-extract-and-chunk");
        assert_eq!(def.tasks.len(), 2);
        assert_eq!(def.tasks[1].depends_on, vec!["extract"]);
        assert_eq!(def.options.timeout_ms, Some(300_000));
        assert!(!def.options.parallel);
    }

    #[test]
    fn test_task_lookup() {
        let def = two_task_definition();
        assert!(def.task("extract").is_some());
        assert!(def.task("missing").is_none());
    }

    #[test]
    fn test_roundtrip_preserves_structure() {
        let def = two_task_definition();
        let json = serde_json::to_value(&def).unwrap();
        let back: WorkflowDefinition = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(serde_json::to_value(&back).unwrap(), json);
    }

    #[test]
    fn test_retries_for() {
        let mut def = two_task_definition();
        // No retry config anywhere: zero extra attempts
        assert_eq!(def.retries_for(&def.tasks[0].clone()), 0);

        // Workflow default applies only when retry_failed_tasks is on
        def.options.max_retries = Some(3);
        assert_eq!(def.retries_for(&def.tasks[0].clone()), 0);
        def.options.retry_failed_tasks = true;
        assert_eq!(def.retries_for(&def.tasks[0].clone()), 3);

        // Task-level retry wins over the workflow default
        def.tasks[0].retry = Some(1);
        assert_eq!(def.retries_for(&def.tasks[0].clone()), 1);
    }
}
