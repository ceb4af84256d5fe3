//! DAG executor for declarative workflows
//!
//! Runs a validated workflow definition layer by layer in topological order.
//! Tasks within a layer run concurrently when `options.parallel` is set,
//! sequentially in declared order otherwise. Task inputs are resolved
//! against the workflow inputs and prior task outputs just before launch.
//!
//! Cancellation is cooperative: the signal is polled between tasks and
//! between layers, never mid-task.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::definition::{TaskDefinition, WorkflowDefinition};
use crate::error::EngineError;
use crate::reference;
use crate::task::{TaskError, TaskExecutor};
use crate::validate;

/// Progress snapshot emitted after each completed task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Progress {
    /// Build a snapshot, deriving the percentage.
    pub fn new(current: usize, total: usize, message: Option<String>) -> Self {
        let percent = if total == 0 {
            0
        } else {
            ((current * 100) / total) as u8
        };
        Self {
            current,
            total,
            percent,
            message,
        }
    }
}

/// Callback invoked with progress snapshots during execution.
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Executes declarative workflows against an external task executor.
pub struct DagExecutor {
    tasks: Arc<dyn TaskExecutor>,
    /// Concurrent task cap within a parallel layer
    parallelism: usize,
}

impl DagExecutor {
    pub fn new(tasks: Arc<dyn TaskExecutor>) -> Self {
        Self {
            tasks,
            parallelism: num_cpus::get(),
        }
    }

    /// Cap concurrent tasks within a parallel layer.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Execute a workflow to completion.
    ///
    /// Returns the resolved output map, or the full per-task results table
    /// when the definition declares no outputs.
    pub async fn execute(
        &self,
        def: &WorkflowDefinition,
        inputs: Map<String, Value>,
        progress: Option<ProgressFn>,
        cancel: CancellationToken,
    ) -> Result<Value, EngineError> {
        validate::validate_workflow(def).into_result()?;

        let layers = validate::execution_layers(def);
        let total = def.tasks.len();
        let mut completed = 0usize;
        let mut results: Map<String, Value> = Map::new();

        info!(workflow = %def.name, tasks = total, parallel = def.options.parallel, "starting workflow");

        for layer in layers {
            if cancel.is_cancelled() {
                info!(workflow = %def.name, completed, "workflow cancelled");
                return Err(EngineError::Cancelled {
                    partial: Some(Value::Object(results)),
                });
            }

            if def.options.parallel && layer.len() > 1 {
                self.run_layer_parallel(
                    def,
                    &layer,
                    &inputs,
                    &mut results,
                    &mut completed,
                    total,
                    progress.as_ref(),
                )
                .await?;
            } else {
                for task_id in &layer {
                    if cancel.is_cancelled() {
                        info!(workflow = %def.name, completed, "workflow cancelled");
                        return Err(EngineError::Cancelled {
                            partial: Some(Value::Object(results)),
                        });
                    }
                    let task = def
                        .task(task_id)
                        .expect("layered task exists in definition");
                    let resolved = reference::resolve_inputs(
                        &task.inputs,
                        &inputs,
                        &results,
                        def.options.strict_references,
                    )?;
                    let output = run_task_with_retries(
                        Arc::clone(&self.tasks),
                        task.clone(),
                        resolved,
                        def.retries_for(task),
                    )
                    .await?;
                    results.insert(task_id.clone(), output);
                    completed += 1;
                    emit_progress(progress.as_ref(), completed, total, task_id);
                }
            }
        }

        info!(workflow = %def.name, completed, "workflow completed");
        Ok(build_output(def, &inputs, results)?)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_layer_parallel(
        &self,
        def: &WorkflowDefinition,
        layer: &[String],
        inputs: &Map<String, Value>,
        results: &mut Map<String, Value>,
        completed: &mut usize,
        total: usize,
        progress: Option<&ProgressFn>,
    ) -> Result<(), EngineError> {
        let mut set = JoinSet::new();
        let semaphore = Arc::new(Semaphore::new(self.parallelism));

        for task_id in layer {
            let task = def
                .task(task_id)
                .expect("layered task exists in definition");
            // Inputs resolve against the frozen pre-layer results: tasks in
            // the same layer never observe each other.
            let resolved = reference::resolve_inputs(
                &task.inputs,
                inputs,
                results,
                def.options.strict_references,
            )?;
            let tasks = Arc::clone(&self.tasks);
            let task = task.clone();
            let retries = def.retries_for(&task);
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire().await;
                let id = task.id.clone();
                let output = run_task_with_retries(tasks, task, resolved, retries).await;
                (id, output)
            });
        }

        while let Some(joined) = set.join_next().await {
            let (task_id, output) = joined
                .map_err(|e| EngineError::execution(format!("task join error: {}", e)))?;
            let output = output?;
            results.insert(task_id.clone(), output);
            *completed += 1;
            emit_progress(progress, *completed, total, &task_id);
        }

        Ok(())
    }
}

/// Run one task, retrying immediately on failure up to `retries` extra
/// attempts. Backoff belongs to higher layers, not here.
async fn run_task_with_retries(
    tasks: Arc<dyn TaskExecutor>,
    task: TaskDefinition,
    inputs: Map<String, Value>,
    retries: u32,
) -> Result<Value, EngineError> {
    let attempts = retries + 1;
    let mut last_error = String::new();

    for attempt in 0..attempts {
        debug!(task = %task.id, kind = %task.task_type, attempt, "executing task");
        let result = match task.timeout_ms {
            Some(ms) => {
                match timeout(
                    Duration::from_millis(ms),
                    tasks.run_task(&task.task_type, inputs.clone()),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TaskError::failed(format!("timed out after {}ms", ms))),
                }
            }
            None => tasks.run_task(&task.task_type, inputs.clone()).await,
        };

        match result {
            Ok(output) => return Ok(output),
            Err(e) => {
                last_error = e.to_string();
                if attempt + 1 < attempts {
                    warn!(task = %task.id, attempt, error = %last_error, "task failed, retrying");
                }
            }
        }
    }

    Err(EngineError::task(task.id, last_error))
}

fn emit_progress(progress: Option<&ProgressFn>, completed: usize, total: usize, task_id: &str) {
    if let Some(callback) = progress {
        callback(Progress::new(
            completed,
            total,
            Some(format!("task '{}' completed", task_id)),
        ));
    }
}

fn build_output(
    def: &WorkflowDefinition,
    inputs: &Map<String, Value>,
    results: Map<String, Value>,
) -> Result<Value, EngineError> {
    if def.output.is_empty() {
        return Ok(Value::Object(results));
    }

    let mut output = Map::new();
    for (key, target) in &def.output {
        let value = Value::String(target.clone());
        let resolved = if def.options.strict_references {
            reference::resolve_strict(&value, inputs, &results)?
        } else {
            reference::resolve(&value, inputs, &results)
        };
        output.insert(key.clone(), resolved);
    }
    Ok(Value::Object(output))
}
