//! Graph definitions for stateful workflows
//!
//! Unlike the acyclic task workflows in [`crate::definition`], graphs may
//! cycle. Nodes carry a type-specific contract (agent, tool, conditional,
//! human, passthrough) and edges route between them, terminating at the
//! `END` sentinel.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::condition::RoutingRule;

/// Sentinel target for terminal edges.
pub const END: &str = "END";

/// Type-specific node contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// LLM-powered step: appends the model reply to `messages`, sets
    /// `last_response`, and runs any returned tool calls.
    Agent {
        model: String,
        system_prompt: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tools: Vec<String>,
    },

    /// Named function call; result lands at `<node_id>_result` in state.
    Tool {
        /// Function to dispatch; defaults to the node id when omitted
        #[serde(default, skip_serializing_if = "Option::is_none")]
        function_name: Option<String>,
    },

    /// Routing step: evaluates ordered rules against the state and yields a
    /// branch label (or a node id directly). Does not mutate state.
    Conditional {
        rules: Vec<RoutingRule>,
        /// Branch taken when no rule matches; END terminates
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },

    /// Human-in-the-loop pause point.
    Human { prompt_message: String },

    /// No-op; state passes through unchanged.
    Passthrough,
}

impl NodeKind {
    /// Short name used in summaries and logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Agent { .. } => "agent",
            NodeKind::Tool { .. } => "tool",
            NodeKind::Conditional { .. } => "conditional",
            NodeKind::Human { .. } => "human",
            NodeKind::Passthrough => "passthrough",
        }
    }
}

/// A node in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,

    #[serde(flatten)]
    pub kind: NodeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Target of an edge: a single node id, or a branch-label map for edges
/// leaving a conditional node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EdgeTarget {
    Node(String),
    Branches(BTreeMap<String, String>),
}

/// A directed edge between nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from_node: String,
    pub to_node: EdgeTarget,
}

/// Schema for one state field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateField {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// State type definition: field name -> schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSchema {
    #[serde(default)]
    pub fields: BTreeMap<String, StateField>,
}

/// Graph execution options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphOptions {
    /// Safety bound on node visits; cycles make this mandatory
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_max_iterations() -> usize {
    50
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            timeout_ms: None,
        }
    }
}

/// Complete graph definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub state_schema: StateSchema,

    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,

    /// Starting node id
    pub entry_point: String,

    /// Node ids whose outgoing edges terminate in END
    #[serde(default)]
    pub finish_points: Vec<String>,

    #[serde(default)]
    pub options: GraphOptions,
}

impl GraphDefinition {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All edges originating from a node.
    pub fn edges_from(&self, id: &str) -> Vec<&GraphEdge> {
        self.edges.iter().filter(|e| e.from_node == id).collect()
    }

    /// Check whether a node is a declared finish point.
    pub fn is_finish_point(&self, id: &str) -> bool {
        self.finish_points.iter().any(|f| f == id)
    }

    /// Human-readable graph summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Graph: {}", self.name);
        if let Some(description) = &self.description {
            let _ = writeln!(out, "Description: {}", description);
        }
        let _ = writeln!(
            out,
            "Version: {}",
            self.version.as_deref().unwrap_or("1.0.0")
        );
        let _ = writeln!(out, "Entry Point: {}", self.entry_point);
        let _ = writeln!(out, "Nodes: {}", self.nodes.len());
        let _ = writeln!(out, "Edges: {}", self.edges.len());

        let _ = writeln!(out, "\nNodes:");
        for node in &self.nodes {
            let _ = writeln!(
                out,
                "  - {} ({}): {}",
                node.id,
                node.kind.type_name(),
                node.description.as_deref().unwrap_or("")
            );
        }

        let _ = writeln!(out, "\nEdges:");
        for edge in &self.edges {
            match &edge.to_node {
                EdgeTarget::Node(target) => {
                    let _ = writeln!(out, "  - {} -> {}", edge.from_node, target);
                }
                EdgeTarget::Branches(branches) => {
                    let _ = writeln!(out, "  - {} -> [conditional]", edge.from_node);
                    for (branch, target) in branches {
                        let _ = writeln!(out, "      {}: {}", branch, target);
                    }
                }
            }
        }

        out
    }
}
