//! Stateful graph workflows: definitions, routing, checkpoints, execution.

pub mod checkpoint;
pub mod condition;
pub mod def;
pub mod executor;
pub mod state;

pub use checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
pub use condition::{RoutingRule, RuleOp};
pub use def::{
    EdgeTarget, GraphDefinition, GraphEdge, GraphNode, GraphOptions, NodeKind, StateField,
    StateSchema, END,
};
pub use executor::{GraphExecutor, GraphOutcome};
pub use state::GraphState;
