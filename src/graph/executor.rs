//! Graph executor for stateful, possibly cyclic workflows
//!
//! Walks the graph one node at a time from the entry point, threading the
//! state record through each node and consulting edges (and conditional
//! routing rules) to pick the next node. Human nodes pause the walk behind
//! a checkpoint; `resume` picks it back up with the human's input merged in.
//!
//! Cycles are legal, so every run enforces `max_iterations` and an optional
//! wall-clock timeout.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::graph::checkpoint::{Checkpoint, CheckpointStore};
use crate::graph::condition;
use crate::graph::def::{EdgeTarget, GraphDefinition, GraphNode, NodeKind, END};
use crate::graph::state::{
    self, GraphState, AWAITING_HUMAN, HUMAN_PROMPT, REQUIRES_HUMAN_INPUT,
};
use crate::task::{ChatMessage, ChatRequest, TaskExecutor};
use crate::validate;

/// Result of a graph execution.
#[derive(Debug, Clone)]
pub enum GraphOutcome {
    /// The walk reached END
    Completed { state: GraphState, iterations: usize },

    /// A human node paused the walk; resume with the checkpoint id
    Paused {
        checkpoint_id: String,
        prompt: String,
        state: GraphState,
    },
}

impl GraphOutcome {
    pub fn is_paused(&self) -> bool {
        matches!(self, GraphOutcome::Paused { .. })
    }

    /// The state carried by either outcome.
    pub fn state(&self) -> &GraphState {
        match self {
            GraphOutcome::Completed { state, .. } => state,
            GraphOutcome::Paused { state, .. } => state,
        }
    }
}

/// Executes graph definitions against an external task executor.
pub struct GraphExecutor {
    tasks: Arc<dyn TaskExecutor>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl GraphExecutor {
    pub fn new(tasks: Arc<dyn TaskExecutor>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self { tasks, checkpoints }
    }

    /// Execute a graph from its entry point.
    ///
    /// `thread_id` keys the checkpoint should the walk pause; a fresh id is
    /// generated when not supplied.
    pub async fn execute(
        &self,
        def: &GraphDefinition,
        inputs: GraphState,
        thread_id: Option<String>,
        cancel: CancellationToken,
    ) -> Result<GraphOutcome, EngineError> {
        validate::validate_graph(def).into_result()?;

        let state = state::initial_state(&def.state_schema, inputs);
        let thread_id = thread_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        info!(graph = %def.name, thread_id = %thread_id, "starting graph execution");

        self.run_bounded(def, def.entry_point.clone(), state, thread_id, 0, cancel)
            .await
    }

    /// Resume a paused execution from its checkpoint.
    ///
    /// `human_input` fields are merged into the saved state, the human flags
    /// are cleared, and the walk continues along the paused node's outgoing
    /// edge. The iteration count continues where the pause left it.
    pub async fn resume(
        &self,
        def: &GraphDefinition,
        checkpoint_id: &str,
        human_input: GraphState,
        cancel: CancellationToken,
    ) -> Result<GraphOutcome, EngineError> {
        let checkpoint = self
            .checkpoints
            .load(checkpoint_id)
            .await?
            .ok_or_else(|| {
                EngineError::resume(format!("checkpoint not found: {}", checkpoint_id))
            })?;

        if checkpoint.graph_name != def.name {
            return Err(EngineError::resume(format!(
                "checkpoint '{}' belongs to graph '{}', not '{}'",
                checkpoint_id, checkpoint.graph_name, def.name
            )));
        }

        let mut state = checkpoint.state;
        state::merge(&mut state, human_input);
        state::clear_human_flags(&mut state);
        info!(graph = %def.name, checkpoint_id, node = %checkpoint.node_id, "resuming graph execution");

        let outcome = match self.next_node(def, &checkpoint.node_id, &state)? {
            Some(next) => {
                self.run_bounded(
                    def,
                    next,
                    state,
                    checkpoint.thread_id.clone(),
                    checkpoint.iterations,
                    cancel,
                )
                .await?
            }
            None => GraphOutcome::Completed {
                state,
                iterations: checkpoint.iterations,
            },
        };

        if !outcome.is_paused() {
            self.checkpoints.delete(checkpoint_id).await?;
        }
        Ok(outcome)
    }

    /// Run with the configured wall-clock bound applied.
    async fn run_bounded(
        &self,
        def: &GraphDefinition,
        current: String,
        state: GraphState,
        thread_id: String,
        iterations: usize,
        cancel: CancellationToken,
    ) -> Result<GraphOutcome, EngineError> {
        match def.options.timeout_ms {
            Some(ms) => {
                let limit = Duration::from_millis(ms);
                match timeout(
                    limit,
                    self.run(def, current, state, thread_id, iterations, cancel),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::Timeout(limit)),
                }
            }
            None => self.run(def, current, state, thread_id, iterations, cancel).await,
        }
    }

    async fn run(
        &self,
        def: &GraphDefinition,
        mut current: String,
        mut state: GraphState,
        thread_id: String,
        mut iterations: usize,
        cancel: CancellationToken,
    ) -> Result<GraphOutcome, EngineError> {
        loop {
            if cancel.is_cancelled() {
                info!(graph = %def.name, node = %current, "graph execution cancelled");
                return Err(EngineError::Cancelled {
                    partial: Some(Value::Object(state)),
                });
            }
            if iterations >= def.options.max_iterations {
                return Err(EngineError::IterationLimit(iterations));
            }
            iterations += 1;

            let node = def.node(&current).ok_or_else(|| {
                EngineError::execution(format!("routing reached unknown node: {}", current))
            })?;
            debug!(graph = %def.name, node = %current, kind = node.kind.type_name(), iteration = iterations, "executing node");

            if let Some(prompt) = self.apply_node(node, &mut state).await? {
                let checkpoint = Checkpoint::new(
                    thread_id.clone(),
                    def.name.clone(),
                    node.id.clone(),
                    state.clone(),
                    iterations,
                );
                self.checkpoints.save(checkpoint).await?;
                info!(graph = %def.name, node = %current, checkpoint_id = %thread_id, "paused for human input");
                return Ok(GraphOutcome::Paused {
                    checkpoint_id: thread_id,
                    prompt,
                    state,
                });
            }

            match self.next_node(def, &current, &state)? {
                Some(next) => current = next,
                None => {
                    info!(graph = %def.name, iterations, "graph execution completed");
                    return Ok(GraphOutcome::Completed { state, iterations });
                }
            }
        }
    }

    /// Apply a node's effect to the state.
    ///
    /// Returns the human prompt when the node pauses the walk.
    async fn apply_node(
        &self,
        node: &GraphNode,
        state: &mut GraphState,
    ) -> Result<Option<String>, EngineError> {
        match &node.kind {
            NodeKind::Agent {
                model,
                system_prompt,
                tools,
            } => {
                let messages: Vec<ChatMessage> = state
                    .get("messages")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();

                let request = ChatRequest {
                    model: model.clone(),
                    system_prompt: system_prompt.clone(),
                    messages: messages.clone(),
                    tools: tools.clone(),
                };
                let response = self
                    .tasks
                    .complete_chat(request)
                    .await
                    .map_err(|e| EngineError::task(node.id.clone(), e.to_string()))?;

                let mut messages = messages;
                messages.push(ChatMessage::assistant(&response.content));
                state.insert(
                    "messages".into(),
                    serde_json::to_value(&messages).unwrap_or(Value::Null),
                );
                state.insert("last_response".into(), json!(response.content));

                if !response.tool_calls.is_empty() {
                    let mut tool_results = Vec::new();
                    for call in &response.tool_calls {
                        let result = self
                            .tasks
                            .call_function(&call.name, &call.arguments)
                            .await
                            .map_err(|e| EngineError::task(node.id.clone(), e.to_string()))?;
                        tool_results.push(result);
                    }
                    state.insert("tool_results".into(), Value::Array(tool_results));
                }
                Ok(None)
            }

            NodeKind::Tool { function_name } => {
                let name = function_name.as_deref().unwrap_or(&node.id);
                let result = self
                    .tasks
                    .call_function(name, state)
                    .await
                    .map_err(|e| EngineError::task(node.id.clone(), e.to_string()))?;
                state.insert(format!("{}_result", node.id), result);
                Ok(None)
            }

            NodeKind::Human { prompt_message } => {
                state.insert(REQUIRES_HUMAN_INPUT.into(), json!(true));
                state.insert(HUMAN_PROMPT.into(), json!(prompt_message));
                state.insert(AWAITING_HUMAN.into(), json!(node.id));
                Ok(Some(prompt_message.clone()))
            }

            // Routing-only; next_node consults the rules
            NodeKind::Conditional { .. } => Ok(None),

            NodeKind::Passthrough => Ok(None),
        }
    }

    /// Pick the next node after `node_id`, or `None` for END.
    fn next_node(
        &self,
        def: &GraphDefinition,
        node_id: &str,
        state: &GraphState,
    ) -> Result<Option<String>, EngineError> {
        if def.is_finish_point(node_id) {
            return Ok(None);
        }

        let edges = def.edges_from(node_id);
        let Some(edge) = edges.first() else {
            return Ok(None);
        };
        if edges.len() > 1 {
            warn!(node = node_id, "multiple outgoing edges; taking the first");
        }

        let node = def.node(node_id);
        if let Some(GraphNode {
            kind: NodeKind::Conditional { rules, default },
            ..
        }) = node
        {
            let Some(branch) = condition::evaluate(rules, default.as_deref(), state) else {
                return Ok(None);
            };
            if branch == END {
                return Ok(None);
            }
            return match &edge.to_node {
                EdgeTarget::Branches(branches) => match branches.get(&branch) {
                    Some(target) if target == END => Ok(None),
                    Some(target) => Ok(Some(target.clone())),
                    None => Err(EngineError::execution(format!(
                        "conditional '{}' produced unmapped branch '{}'",
                        node_id, branch
                    ))),
                },
                // A single target ignores the branch label
                EdgeTarget::Node(target) if target == END => Ok(None),
                EdgeTarget::Node(target) => Ok(Some(target.clone())),
            };
        }

        match &edge.to_node {
            EdgeTarget::Node(target) if target == END => Ok(None),
            EdgeTarget::Node(target) => Ok(Some(target.clone())),
            EdgeTarget::Branches(_) => Err(EngineError::execution(format!(
                "node '{}' has a branch map but is not conditional",
                node_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::checkpoint::MemoryCheckpointStore;
    use crate::task::{ChatResponse, TaskError, ToolCall};
    use async_trait::async_trait;
    use serde_json::Map;

    struct GraphStub {
        tool_calls: Vec<ToolCall>,
    }

    impl GraphStub {
        fn new() -> Self {
            Self { tool_calls: Vec::new() }
        }

        fn with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
            Self { tool_calls }
        }
    }

    #[async_trait]
    impl TaskExecutor for GraphStub {
        async fn run_task(
            &self,
            task_type: &str,
            _inputs: Map<String, Value>,
        ) -> Result<Value, TaskError> {
            Err(TaskError::UnknownType(task_type.to_string()))
        }

        async fn complete_chat(&self, request: ChatRequest) -> Result<ChatResponse, TaskError> {
            Ok(ChatResponse {
                content: format!("analyzed with {}", request.model),
                tool_calls: self.tool_calls.clone(),
            })
        }

        async fn call_function(
            &self,
            name: &str,
            _arguments: &Map<String, Value>,
        ) -> Result<Value, TaskError> {
            Ok(json!({"function": name, "ok": true}))
        }
    }

    fn executor(stub: GraphStub) -> GraphExecutor {
        GraphExecutor::new(Arc::new(stub), Arc::new(MemoryCheckpointStore::new()))
    }

    fn graph(value: Value) -> GraphDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn linear_graph() -> GraphDefinition {
        graph(json!({
            "name": "linear",
            "nodes": [
                {"id": "start", "type": "passthrough"},
                {"id": "work", "type": "tool", "function_name": "chunk_text"},
                {"id": "finish", "type": "passthrough"}
            ],
            "edges": [
                {"from_node": "start", "to_node": "work"},
                {"from_node": "work", "to_node": "finish"},
                {"from_node": "finish", "to_node": "END"}
            ],
            "entry_point": "start"
        }))
    }

    #[tokio::test]
    async fn test_linear_walk_completes() {
        let exec = executor(GraphStub::new());
        let outcome = exec
            .execute(&linear_graph(), GraphState::new(), None, CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            GraphOutcome::Completed { state, iterations } => {
                assert_eq!(iterations, 3);
                assert_eq!(state["work_result"]["function"], json!("chunk_text"));
            }
            GraphOutcome::Paused { .. } => panic!("should not pause"),
        }
    }

    #[tokio::test]
    async fn test_agent_node_updates_messages() {
        let def = graph(json!({
            "name": "agent-only",
            "state_schema": {"fields": {"messages": {"type": "array", "default": []}}},
            "nodes": [
                {"id": "analyze", "type": "agent", "model": "gpt-4o",
                 "system_prompt": "Analyze."}
            ],
            "edges": [{"from_node": "analyze", "to_node": "END"}],
            "entry_point": "analyze"
        }));

        let exec = executor(GraphStub::new());
        let outcome = exec
            .execute(&def, GraphState::new(), None, CancellationToken::new())
            .await
            .unwrap();

        let state = outcome.state();
        assert_eq!(state["last_response"], json!("analyzed with gpt-4o"));
        let messages = state["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], json!("assistant"));
    }

    #[tokio::test]
    async fn test_agent_tool_calls_collected() {
        let def = graph(json!({
            "name": "agent-tools",
            "nodes": [
                {"id": "analyze", "type": "agent", "model": "gpt-4o",
                 "system_prompt": "Analyze.", "tools": ["web_search"]}
            ],
            "edges": [{"from_node": "analyze", "to_node": "END"}],
            "entry_point": "analyze"
        }));

        let calls = vec![ToolCall {
            name: "web_search".into(),
            arguments: Map::new(),
        }];
        let exec = executor(GraphStub::with_tool_calls(calls));
        let outcome = exec
            .execute(&def, GraphState::new(), None, CancellationToken::new())
            .await
            .unwrap();

        let results = outcome.state()["tool_results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["function"], json!("web_search"));
    }

    fn human_graph() -> GraphDefinition {
        graph(json!({
            "name": "approval",
            "nodes": [
                {"id": "analyze", "type": "agent", "model": "gpt-4o",
                 "system_prompt": "Analyze."},
                {"id": "review", "type": "human", "prompt_message": "Approve?"},
                {"id": "finalize", "type": "passthrough"}
            ],
            "edges": [
                {"from_node": "analyze", "to_node": "review"},
                {"from_node": "review", "to_node": "finalize"},
                {"from_node": "finalize", "to_node": "END"}
            ],
            "entry_point": "analyze",
            "finish_points": ["finalize"]
        }))
    }

    #[tokio::test]
    async fn test_human_node_pauses_and_resumes() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let exec = GraphExecutor::new(Arc::new(GraphStub::new()), store.clone());

        let outcome = exec
            .execute(
                &human_graph(),
                GraphState::new(),
                Some("thread-42".into()),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let GraphOutcome::Paused {
            checkpoint_id,
            prompt,
            state,
        } = outcome
        else {
            panic!("expected pause");
        };
        assert_eq!(checkpoint_id, "thread-42");
        assert_eq!(prompt, "Approve?");
        assert_eq!(state[REQUIRES_HUMAN_INPUT], json!(true));
        assert_eq!(state[AWAITING_HUMAN], json!("review"));
        assert!(store.load("thread-42").await.unwrap().is_some());

        let mut human_input = GraphState::new();
        human_input.insert("approved".into(), json!(true));
        let outcome = exec
            .resume(&human_graph(), "thread-42", human_input, CancellationToken::new())
            .await
            .unwrap();

        let GraphOutcome::Completed { state, .. } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(state["approved"], json!(true));
        assert!(!state.contains_key(REQUIRES_HUMAN_INPUT));
        // Consumed on completion
        assert!(store.load("thread-42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_with_empty_input_still_advances() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let exec = GraphExecutor::new(Arc::new(GraphStub::new()), store);

        exec.execute(
            &human_graph(),
            GraphState::new(),
            Some("t".into()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let outcome = exec
            .resume(&human_graph(), "t", GraphState::new(), CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.is_paused());
        assert!(!outcome.state().contains_key(REQUIRES_HUMAN_INPUT));
    }

    #[tokio::test]
    async fn test_resume_missing_checkpoint() {
        let exec = executor(GraphStub::new());
        let err = exec
            .resume(&human_graph(), "nope", GraphState::new(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Resume(_)));
    }

    #[tokio::test]
    async fn test_conditional_cycle_hits_iteration_limit() {
        let def = graph(json!({
            "name": "forever",
            "options": {"max_iterations": 10},
            "nodes": [
                {"id": "work", "type": "passthrough"},
                {"id": "check", "type": "conditional",
                 "rules": [{"field": "done", "op": "truthy", "branch": "out"}],
                 "default": "again"}
            ],
            "edges": [
                {"from_node": "work", "to_node": "check"},
                {"from_node": "check", "to_node": {"out": "END", "again": "work"}}
            ],
            "entry_point": "work"
        }));

        let exec = executor(GraphStub::new());
        let err = exec
            .execute(&def, GraphState::new(), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IterationLimit(10)));
    }

    #[tokio::test]
    async fn test_conditional_routes_out_of_cycle() {
        let def = graph(json!({
            "name": "bounded-loop",
            "nodes": [
                {"id": "work", "type": "tool", "function_name": "step"},
                {"id": "check", "type": "conditional",
                 "rules": [{"field": "work_result", "op": "exists", "branch": "out"}],
                 "default": "again"},
                {"id": "done", "type": "passthrough"}
            ],
            "edges": [
                {"from_node": "work", "to_node": "check"},
                {"from_node": "check", "to_node": {"out": "done", "again": "work"}},
                {"from_node": "done", "to_node": "END"}
            ],
            "entry_point": "work"
        }));

        let exec = executor(GraphStub::new());
        let outcome = exec
            .execute(&def, GraphState::new(), None, CancellationToken::new())
            .await
            .unwrap();
        // work -> check -> done: the first tool result routes out
        match outcome {
            GraphOutcome::Completed { iterations, .. } => assert_eq!(iterations, 3),
            GraphOutcome::Paused { .. } => panic!("should not pause"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_between_nodes() {
        let def = linear_graph();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let exec = executor(GraphStub::new());
        let err = exec
            .execute(&def, GraphState::new(), None, cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_state_defaults_applied() {
        let def = graph(json!({
            "name": "defaults",
            "state_schema": {"fields": {
                "count": {"type": "integer", "default": 7}
            }},
            "nodes": [{"id": "noop", "type": "passthrough"}],
            "edges": [{"from_node": "noop", "to_node": "END"}],
            "entry_point": "noop"
        }));

        let exec = executor(GraphStub::new());
        let outcome = exec
            .execute(&def, GraphState::new(), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.state()["count"], json!(7));
    }
}
