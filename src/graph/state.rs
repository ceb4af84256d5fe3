//! Graph execution state
//!
//! State is a plain field-name -> value record carried across nodes. It is
//! passed by value at node boundaries: every node receives its own copy and
//! returns the updated record, so state is never shared across tasks.

use serde_json::{Map, Value};

use crate::graph::def::StateSchema;

/// The state record threaded through a graph execution.
pub type GraphState = Map<String, Value>;

/// State field set by a human node to signal the pause.
pub const REQUIRES_HUMAN_INPUT: &str = "requires_human_input";

/// State field carrying the prompt shown to the human.
pub const HUMAN_PROMPT: &str = "human_prompt";

/// State field naming the node awaiting input.
pub const AWAITING_HUMAN: &str = "awaiting_human";

/// Build the initial state: schema defaults first, then the caller's inputs
/// on top.
pub fn initial_state(schema: &StateSchema, inputs: GraphState) -> GraphState {
    let mut state = GraphState::new();
    for (field, spec) in &schema.fields {
        if let Some(default) = &spec.default {
            state.insert(field.clone(), default.clone());
        }
    }
    for (key, value) in inputs {
        state.insert(key, value);
    }
    state
}

/// Merge an update record into the state, overwriting existing fields.
pub fn merge(state: &mut GraphState, updates: GraphState) {
    for (key, value) in updates {
        state.insert(key, value);
    }
}

/// Clear the human-input flags after a resume.
pub fn clear_human_flags(state: &mut GraphState) {
    state.remove(REQUIRES_HUMAN_INPUT);
    state.remove(HUMAN_PROMPT);
    state.remove(AWAITING_HUMAN);
}
