//! Workflow engine facade
//!
//! Owns the registries (pre-built workflows, custom workflows, graphs,
//! templates), the two executors, and the job manager. External callers
//! such as RPC handlers and CLIs talk to [`WorkflowEngine`]; nothing below
//! this module knows about registries and job scheduling at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dag::{DagExecutor, ProgressFn};
use crate::definition::WorkflowDefinition;
use crate::error::{EngineError, ResourceKind};
use crate::graph::{
    CheckpointStore, GraphDefinition, GraphExecutor, GraphOutcome, GraphState,
    MemoryCheckpointStore,
};
use crate::jobs::job::{Job, JobPriority, WebhookConfig, WorkflowRef};
use crate::jobs::{
    JobDispatcher, JobFilter, JobManager, JobManagerConfig, JobOutcome, JobStats, SubmitRequest,
};
use crate::task::TaskExecutor;
use crate::template::{TemplateInfo, TemplateRegistry};
use crate::validate::{self, Validation};

/// Result of a template instantiation through the engine.
#[derive(Debug, Clone, Serialize)]
pub struct InstantiatedTemplate {
    pub definition: WorkflowDefinition,
    pub registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

/// Shared core: registries and executors, free of job scheduling.
pub struct EngineCore {
    tasks: Arc<dyn TaskExecutor>,
    templates: TemplateRegistry,
    prebuilt: HashMap<String, WorkflowDefinition>,
    custom: RwLock<HashMap<String, WorkflowDefinition>>,
    graphs: RwLock<HashMap<String, GraphDefinition>>,
    dag: DagExecutor,
    graph_exec: GraphExecutor,
}

impl EngineCore {
    fn new(tasks: Arc<dyn TaskExecutor>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            templates: TemplateRegistry::builtin(),
            prebuilt: prebuilt_workflows(),
            custom: RwLock::new(HashMap::new()),
            graphs: RwLock::new(HashMap::new()),
            dag: DagExecutor::new(tasks.clone()),
            graph_exec: GraphExecutor::new(tasks.clone(), checkpoints),
            tasks,
        }
    }

    /// Resolve a workflow id against the pre-built then custom registries.
    async fn resolve_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<(WorkflowDefinition, &'static str), EngineError> {
        if let Some(def) = self.prebuilt.get(workflow_id) {
            return Ok((def.clone(), "pre-built"));
        }
        let custom = self.custom.read().await;
        custom
            .get(workflow_id)
            .map(|def| (def.clone(), "custom"))
            .ok_or_else(|| EngineError::not_found(ResourceKind::Workflow, workflow_id))
    }

    async fn resolve_graph(&self, graph_id: &str) -> Result<GraphDefinition, EngineError> {
        let graphs = self.graphs.read().await;
        graphs
            .get(graph_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(ResourceKind::Graph, graph_id))
    }

    /// Run a definition, honoring its configured timeout.
    async fn run_definition(
        &self,
        def: &WorkflowDefinition,
        inputs: Map<String, Value>,
        progress: Option<ProgressFn>,
        cancel: CancellationToken,
    ) -> Result<Value, EngineError> {
        match def.options.timeout_ms {
            Some(ms) => {
                let limit = Duration::from_millis(ms);
                match timeout(limit, self.dag.execute(def, inputs, progress, cancel)).await {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::Timeout(limit)),
                }
            }
            None => self.dag.execute(def, inputs, progress, cancel).await,
        }
    }
}

#[async_trait]
impl JobDispatcher for EngineCore {
    async fn run(
        &self,
        workflow_ref: &WorkflowRef,
        inputs: &Map<String, Value>,
        thread_id: &str,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, EngineError> {
        match workflow_ref {
            WorkflowRef::Workflow(id) => {
                let (def, _) = self.resolve_workflow(id).await?;
                let result = self
                    .dag
                    .execute(&def, inputs.clone(), Some(progress), cancel)
                    .await?;
                Ok(JobOutcome::Completed(result))
            }
            WorkflowRef::Inline(def) => {
                let result = self
                    .dag
                    .execute(def, inputs.clone(), Some(progress), cancel)
                    .await?;
                Ok(JobOutcome::Completed(result))
            }
            WorkflowRef::Graph(id) => {
                let def = self.resolve_graph(id).await?;
                let outcome = self
                    .graph_exec
                    .execute(&def, inputs.clone(), Some(thread_id.to_string()), cancel)
                    .await?;
                Ok(match outcome {
                    GraphOutcome::Completed { state, .. } => {
                        JobOutcome::Completed(Value::Object(state))
                    }
                    GraphOutcome::Paused {
                        checkpoint_id,
                        prompt,
                        state,
                    } => JobOutcome::Paused {
                        checkpoint_id,
                        prompt,
                        state,
                    },
                })
            }
        }
    }

    async fn resume(
        &self,
        workflow_ref: &WorkflowRef,
        checkpoint_id: &str,
        human_input: &Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, EngineError> {
        let WorkflowRef::Graph(id) = workflow_ref else {
            return Err(EngineError::resume("only graph jobs can be resumed"));
        };
        let def = self.resolve_graph(id).await?;
        let outcome = self
            .graph_exec
            .resume(&def, checkpoint_id, human_input.clone(), cancel)
            .await?;
        Ok(match outcome {
            GraphOutcome::Completed { state, .. } => JobOutcome::Completed(Value::Object(state)),
            GraphOutcome::Paused {
                checkpoint_id,
                prompt,
                state,
            } => JobOutcome::Paused {
                checkpoint_id,
                prompt,
                state,
            },
        })
    }

    async fn configured_timeout(&self, workflow_ref: &WorkflowRef) -> Option<Duration> {
        match workflow_ref {
            WorkflowRef::Workflow(id) => self
                .resolve_workflow(id)
                .await
                .ok()
                .and_then(|(def, _)| def.options.timeout_ms)
                .map(Duration::from_millis),
            WorkflowRef::Inline(def) => def.options.timeout_ms.map(Duration::from_millis),
            WorkflowRef::Graph(id) => self
                .resolve_graph(id)
                .await
                .ok()
                .and_then(|def| def.options.timeout_ms)
                .map(Duration::from_millis),
        }
    }
}

/// The workflow engine: registries, executors, and job management behind
/// one interface.
pub struct WorkflowEngine {
    core: Arc<EngineCore>,
    jobs: JobManager,
}

impl WorkflowEngine {
    /// Create an engine with default job manager configuration.
    pub fn new(tasks: Arc<dyn TaskExecutor>) -> Self {
        Self::with_config(tasks, JobManagerConfig::default())
    }

    /// Create an engine with a custom job manager configuration.
    pub fn with_config(tasks: Arc<dyn TaskExecutor>, config: JobManagerConfig) -> Self {
        Self::with_checkpoint_store(tasks, config, Arc::new(MemoryCheckpointStore::new()))
    }

    /// Create an engine with a custom checkpoint store.
    pub fn with_checkpoint_store(
        tasks: Arc<dyn TaskExecutor>,
        config: JobManagerConfig,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let core = Arc::new(EngineCore::new(tasks, checkpoints));
        let jobs = JobManager::new(core.clone(), config);
        Self { core, jobs }
    }

    // ------------------------------------------------------------------
    // Synchronous execution
    // ------------------------------------------------------------------

    /// Execute a registered workflow and block until terminal.
    pub async fn execute(
        &self,
        workflow_id: &str,
        inputs: Map<String, Value>,
    ) -> Result<Value, EngineError> {
        let (def, _) = self.core.resolve_workflow(workflow_id).await?;
        self.core
            .run_definition(&def, inputs, None, CancellationToken::new())
            .await
    }

    /// Execute an inline definition and block until terminal.
    pub async fn execute_definition(
        &self,
        def: &WorkflowDefinition,
        inputs: Map<String, Value>,
    ) -> Result<Value, EngineError> {
        self.core
            .run_definition(def, inputs, None, CancellationToken::new())
            .await
    }

    /// Execute a registered graph, optionally under a known thread id.
    pub async fn execute_graph(
        &self,
        graph_id: &str,
        inputs: GraphState,
        thread_id: Option<String>,
    ) -> Result<GraphOutcome, EngineError> {
        let def = self.core.resolve_graph(graph_id).await?;
        self.core
            .graph_exec
            .execute(&def, inputs, thread_id, CancellationToken::new())
            .await
    }

    /// Resume a paused graph execution.
    ///
    /// If the checkpoint belongs to a paused job, the job is driven back to
    /// RUNNING and settled; otherwise the graph executor resumes directly.
    pub async fn resume_graph(
        &self,
        graph_id: &str,
        checkpoint_id: &str,
        human_input: GraphState,
    ) -> Result<GraphOutcome, EngineError> {
        if self.jobs.has_paused_checkpoint(checkpoint_id).await {
            let job = self
                .jobs
                .resume_by_checkpoint(checkpoint_id, &human_input)
                .await?;
            return job_to_graph_outcome(job);
        }

        let def = self.core.resolve_graph(graph_id).await?;
        self.core
            .graph_exec
            .resume(&def, checkpoint_id, human_input, CancellationToken::new())
            .await
    }

    // ------------------------------------------------------------------
    // Asynchronous execution
    // ------------------------------------------------------------------

    /// Submit a registered workflow for background execution.
    pub async fn execute_async(
        &self,
        workflow_id: &str,
        inputs: Map<String, Value>,
        priority: JobPriority,
        webhook: Option<WebhookConfig>,
    ) -> Result<String, EngineError> {
        let (_, workflow_type) = self.core.resolve_workflow(workflow_id).await?;
        self.jobs
            .submit(SubmitRequest {
                workflow_ref: WorkflowRef::Workflow(workflow_id.to_string()),
                workflow_type: workflow_type.to_string(),
                inputs,
                priority,
                webhook,
            })
            .await
    }

    /// Submit an inline definition for background execution.
    pub async fn execute_definition_async(
        &self,
        def: WorkflowDefinition,
        inputs: Map<String, Value>,
        priority: JobPriority,
        webhook: Option<WebhookConfig>,
    ) -> Result<String, EngineError> {
        validate::validate_workflow(&def).into_result()?;
        self.jobs
            .submit(SubmitRequest {
                workflow_ref: WorkflowRef::Inline(Box::new(def)),
                workflow_type: "inline".to_string(),
                inputs,
                priority,
                webhook,
            })
            .await
    }

    /// Submit a registered graph for background execution.
    pub async fn execute_graph_async(
        &self,
        graph_id: &str,
        inputs: GraphState,
        priority: JobPriority,
        webhook: Option<WebhookConfig>,
    ) -> Result<String, EngineError> {
        self.core.resolve_graph(graph_id).await?;
        self.jobs
            .submit(SubmitRequest {
                workflow_ref: WorkflowRef::Graph(graph_id.to_string()),
                workflow_type: "graph".to_string(),
                inputs,
                priority,
                webhook,
            })
            .await
    }

    // ------------------------------------------------------------------
    // Custom workflow registry
    // ------------------------------------------------------------------

    /// Register a custom workflow definition under an id.
    pub async fn register_custom_workflow(
        &self,
        workflow_id: &str,
        def: WorkflowDefinition,
    ) -> Result<(), EngineError> {
        validate::validate_workflow(&def).into_result()?;
        if self.core.prebuilt.contains_key(workflow_id) {
            return Err(EngineError::validation(format!(
                "workflow id '{}' is reserved by a pre-built workflow",
                workflow_id
            )));
        }
        let mut custom = self.core.custom.write().await;
        if custom.contains_key(workflow_id) {
            return Err(EngineError::validation(format!(
                "workflow '{}' is already registered",
                workflow_id
            )));
        }
        custom.insert(workflow_id.to_string(), def);
        info!(workflow_id, "custom workflow registered");
        Ok(())
    }

    pub async fn get_custom_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowDefinition, EngineError> {
        let custom = self.core.custom.read().await;
        custom
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(ResourceKind::Workflow, workflow_id))
    }

    pub async fn list_custom_workflows(&self) -> Vec<String> {
        let custom = self.core.custom.read().await;
        let mut ids: Vec<String> = custom.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn delete_custom_workflow(&self, workflow_id: &str) -> Result<(), EngineError> {
        let mut custom = self.core.custom.write().await;
        custom
            .remove(workflow_id)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found(ResourceKind::Workflow, workflow_id))
    }

    /// Pre-built workflow ids, sorted.
    pub fn list_prebuilt_workflows(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.core.prebuilt.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Validate a workflow definition without registering it.
    pub fn validate_workflow_definition(&self, def: &WorkflowDefinition) -> Validation {
        validate::validate_workflow(def)
    }

    // ------------------------------------------------------------------
    // Graph registry
    // ------------------------------------------------------------------

    pub async fn register_graph(
        &self,
        graph_id: &str,
        def: GraphDefinition,
    ) -> Result<(), EngineError> {
        validate::validate_graph(&def).into_result()?;
        let mut graphs = self.core.graphs.write().await;
        if graphs.contains_key(graph_id) {
            return Err(EngineError::validation(format!(
                "graph '{}' is already registered",
                graph_id
            )));
        }
        graphs.insert(graph_id.to_string(), def);
        info!(graph_id, "graph registered");
        Ok(())
    }

    pub async fn get_graph(&self, graph_id: &str) -> Result<GraphDefinition, EngineError> {
        self.core.resolve_graph(graph_id).await
    }

    pub async fn list_graphs(&self) -> Vec<String> {
        let graphs = self.core.graphs.read().await;
        let mut ids: Vec<String> = graphs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn delete_graph(&self, graph_id: &str) -> Result<(), EngineError> {
        let mut graphs = self.core.graphs.write().await;
        graphs
            .remove(graph_id)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found(ResourceKind::Graph, graph_id))
    }

    /// Validate a graph definition without registering it.
    pub fn validate_graph_definition(&self, def: &GraphDefinition) -> Validation {
        validate::validate_graph(def)
    }

    /// Human-readable summary of a registered graph.
    pub async fn graph_summary(&self, graph_id: &str) -> Result<String, EngineError> {
        Ok(self.core.resolve_graph(graph_id).await?.summary())
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    pub fn list_templates(&self, category: Option<&str>) -> Vec<TemplateInfo> {
        self.core.templates.list(category)
    }

    pub fn get_template(&self, template_id: &str) -> Result<TemplateInfo, EngineError> {
        self.core
            .templates
            .get(template_id)
            .map(|t| t.info())
            .ok_or_else(|| EngineError::not_found(ResourceKind::Template, template_id))
    }

    pub fn template_categories(&self) -> Vec<String> {
        self.core.templates.categories()
    }

    /// Instantiate a template; optionally register the result as a custom
    /// workflow under `workflow_id`.
    pub async fn instantiate_template(
        &self,
        template_id: &str,
        params: &Map<String, Value>,
        auto_register: bool,
        workflow_id: Option<&str>,
    ) -> Result<InstantiatedTemplate, EngineError> {
        let definition = self.core.templates.instantiate(template_id, params)?;

        if !auto_register {
            return Ok(InstantiatedTemplate {
                definition,
                registered: false,
                workflow_id: None,
            });
        }

        let workflow_id = workflow_id.ok_or_else(|| {
            EngineError::validation("workflow_id is required when auto_register is set")
        })?;
        self.register_custom_workflow(workflow_id, definition.clone())
            .await?;
        Ok(InstantiatedTemplate {
            definition,
            registered: true,
            workflow_id: Some(workflow_id.to_string()),
        })
    }

    // ------------------------------------------------------------------
    // Job administration
    // ------------------------------------------------------------------

    pub async fn get_job_status(&self, job_id: &str) -> Result<Job, EngineError> {
        self.jobs
            .get(job_id)
            .await
            .ok_or_else(|| EngineError::not_found(ResourceKind::Job, job_id))
    }

    pub async fn list_jobs(&self, filter: JobFilter) -> Vec<Job> {
        self.jobs.list(filter).await
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<crate::jobs::job::JobStatus, EngineError> {
        self.jobs.cancel(job_id).await
    }

    pub async fn delete_job(&self, job_id: &str) -> Result<(), EngineError> {
        self.jobs.delete(job_id).await
    }

    pub async fn job_stats(&self) -> JobStats {
        self.jobs.stats().await
    }

    /// The external task executor this engine dispatches to.
    pub fn task_executor(&self) -> Arc<dyn TaskExecutor> {
        self.core.tasks.clone()
    }
}

/// Map a settled job back to a graph outcome for resume callers.
fn job_to_graph_outcome(job: Job) -> Result<GraphOutcome, EngineError> {
    use crate::jobs::job::JobStatus;
    match job.status {
        JobStatus::Completed => {
            let state = match job.result {
                Some(Value::Object(map)) => map,
                _ => GraphState::new(),
            };
            Ok(GraphOutcome::Completed {
                state,
                iterations: 0,
            })
        }
        JobStatus::Paused => {
            let state = match job.paused_state {
                Some(Value::Object(map)) => map,
                _ => GraphState::new(),
            };
            Ok(GraphOutcome::Paused {
                checkpoint_id: job.checkpoint_id.unwrap_or_default(),
                prompt: job.human_prompt.unwrap_or_default(),
                state,
            })
        }
        _ => Err(EngineError::execution(
            job.error
                .unwrap_or_else(|| format!("job ended {}", job.status)),
        )),
    }
}

/// Pre-built workflows shipped with the engine.
fn prebuilt_workflows() -> HashMap<String, WorkflowDefinition> {
    let mut prebuilt = HashMap::new();

    let definitions = [
        json!({
            "name": "pdf-extract-and-chunk",
            "description": "Extract PDF text and chunk into segments",
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
                    "inputs": {
                        "document_id": "{{workflow.input.document_id}}",
                        "project_id": "{{workflow.input.project_id}}",
                        "content": "{{extract.text}}",
                        "chunk_size": "{{workflow.input.chunk_size}}",
                        "chunk_overlap": "{{workflow.input.chunk_overlap}}"
                    }
                }
            ],
            "output": {
                "chunks": "{{chunk.chunks}}",
                "total_chunks": "{{chunk.total_chunks}}",
                "metadata": "{{extract.metadata}}"
            },
            "options": {"parallel": false, "timeout_ms": 300000}
        }),
        json!({
            "name": "pdf-to-html",
            "description": "Convert a PDF to styled HTML with token counting",
            "version": "1.0.0",
            "tasks": [
                {
                    "id": "extract",
                    "type": "extract_pdf_text",
                    "inputs": {"pdf_data": "{{workflow.input.pdf_data}}"}
                },
                {
                    "id": "count",
                    "type": "count_tokens",
                    "depends_on": ["extract"],
                    "inputs": {
                        "content": "{{extract.text}}",
                        "model": "{{workflow.input.model}}"
                    }
                },
                {
                    "id": "import",
                    "type": "import_markdown",
                    "depends_on": ["extract"],
                    "inputs": {
                        "content": "{{extract.text}}",
                        "strict_mode": false,
                        "include_metadata": true
                    }
                },
                {
                    "id": "export",
                    "type": "export_html",
                    "depends_on": ["import"],
                    "inputs": {
                        "document": "{{import.document}}",
                        "include_styles": "{{workflow.input.include_styles}}",
                        "include_metadata": true,
                        "class_name": "custom-doc",
                        "title": "{{workflow.input.title}}"
                    }
                }
            ],
            "output": {
                "html": "{{export.html}}",
                "token_count": "{{count.token_count}}",
                "pages": "{{extract.metadata.pages}}"
            },
            "options": {"parallel": true, "timeout_ms": 600000}
        }),
        json!({
            "name": "multi-format-export",
            "description": "Export a document to multiple formats in parallel",
            "version": "1.0.0",
            "tasks": [
                {
                    "id": "import",
                    "type": "import_markdown",
                    "inputs": {
                        "content": "{{workflow.input.content}}",
                        "strict_mode": false,
                        "include_metadata": true
                    }
                },
                {
                    "id": "export_html",
                    "type": "export_html",
                    "depends_on": ["import"],
                    "inputs": {
                        "document": "{{import.document}}",
                        "include_styles": true,
                        "include_metadata": false,
                        "class_name": "exported-doc",
                        "title": "{{workflow.input.title}}"
                    }
                },
                {
                    "id": "export_md",
                    "type": "export_markdown",
                    "depends_on": ["import"],
                    "inputs": {
                        "document": "{{import.document}}",
                        "include_metadata": false
                    }
                }
            ],
            "output": {
                "html": "{{export_html.html}}",
                "markdown": "{{export_md.markdown}}"
            },
            "options": {"parallel": true, "timeout_ms": 300000}
        }),
    ];

    for value in definitions {
        let def: WorkflowDefinition =
            serde_json::from_value(value).expect("pre-built workflow definition is well-formed");
        prebuilt.insert(def.name.clone(), def);
    }
    prebuilt
}
