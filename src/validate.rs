//! Definition validation
//!
//! The only authority on definition well-formedness. Validation never
//! propagates as an error value up the call stack on its own: both entry
//! points return a structured [`Validation`] that callers convert with
//! [`Validation::into_result`] when they need to reject a submission.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::definition::{TaskDefinition, WorkflowDefinition};
use crate::error::EngineError;
use crate::graph::{EdgeTarget, GraphDefinition, NodeKind, END};
use crate::reference;

/// Structured validation outcome.
#[derive(Debug, Clone, Serialize)]
pub struct Validation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Validation {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(message.into()),
        }
    }

    /// Convert into a `Result`, mapping failure to a validation error.
    pub fn into_result(self) -> Result<(), EngineError> {
        match self.error {
            None => Ok(()),
            Some(message) => Err(EngineError::Validation(message)),
        }
    }
}

/// Validate a declarative workflow definition.
pub fn validate_workflow(def: &WorkflowDefinition) -> Validation {
    if def.name.is_empty() {
        return Validation::fail("missing required field: name");
    }
    if def.tasks.is_empty() {
        return Validation::fail("missing or empty tasks list");
    }

    let mut task_ids = HashSet::new();
    for task in &def.tasks {
        if task.id.is_empty() {
            return Validation::fail("task missing required field: id");
        }
        if task.task_type.is_empty() {
            return Validation::fail(format!("task '{}' missing required field: type", task.id));
        }
        if !task_ids.insert(task.id.as_str()) {
            return Validation::fail(format!("duplicate task id: {}", task.id));
        }
    }

    for task in &def.tasks {
        for dep in &task.depends_on {
            if !task_ids.contains(dep.as_str()) {
                return Validation::fail(format!("task '{}': unknown dependency: {}", task.id, dep));
            }
        }
    }

    if has_cycle(&def.tasks) {
        return Validation::fail("workflow contains circular dependencies");
    }

    // Reference sources: workflow inputs are accepted blindly (resolved at
    // run time), task references must name a declared task.
    for task in &def.tasks {
        for (input, value) in &task.inputs {
            if let Some(err) = check_reference_source(value, &task_ids) {
                return Validation::fail(format!(
                    "task '{}' input '{}': {}",
                    task.id, input, err
                ));
            }
        }
    }
    for (output, target) in &def.output {
        let value = serde_json::Value::String(target.clone());
        if let Some(err) = check_reference_source(&value, &task_ids) {
            return Validation::fail(format!("output '{}': {}", output, err));
        }
    }

    Validation::ok()
}

fn check_reference_source(
    value: &serde_json::Value,
    task_ids: &HashSet<&str>,
) -> Option<String> {
    if !reference::is_reference(value) {
        return None;
    }
    let text = value.as_str()?;
    let path = text[2..text.len() - 2].trim();
    if path.starts_with("workflow.input.") {
        return None;
    }
    let task_id = path.split('.').next().unwrap_or(path);
    if task_ids.contains(task_id) {
        None
    } else {
        Some(format!("reference to unknown task: {}", task_id))
    }
}

/// Cycle check over `depends_on` edges using three-color DFS.
fn has_cycle(tasks: &[TaskDefinition]) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let deps: HashMap<&str, &[String]> = tasks
        .iter()
        .map(|t| (t.id.as_str(), t.depends_on.as_slice()))
        .collect();
    let mut colors: HashMap<&str, Color> =
        tasks.iter().map(|t| (t.id.as_str(), Color::White)).collect();

    fn visit<'a>(
        node: &'a str,
        deps: &HashMap<&'a str, &'a [String]>,
        colors: &mut HashMap<&'a str, Color>,
    ) -> bool {
        colors.insert(node, Color::Gray);
        if let Some(node_deps) = deps.get(node) {
            for dep in node_deps.iter() {
                match colors.get(dep.as_str()) {
                    Some(Color::Gray) => return true,
                    Some(Color::White) => {
                        if visit(dep, deps, colors) {
                            return true;
                        }
                    }
                    _ => {}
                }
            }
        }
        colors.insert(node, Color::Black);
        false
    }

    let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    for id in ids {
        if colors.get(id) == Some(&Color::White) && visit(id, &deps, &mut colors) {
            return true;
        }
    }
    false
}

/// Topological layering via Kahn's algorithm.
///
/// Tasks within a layer have all dependencies satisfied by earlier layers.
/// Assumes a validated (acyclic) definition; layer order within a layer
/// follows declaration order.
pub fn execution_layers(def: &WorkflowDefinition) -> Vec<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = def
        .tasks
        .iter()
        .map(|t| (t.id.as_str(), t.depends_on.len()))
        .collect();

    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in &def.tasks {
        for dep in &task.depends_on {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(task.id.as_str());
        }
    }

    let mut layers = Vec::new();
    let mut ready: VecDeque<&str> = def
        .tasks
        .iter()
        .filter(|t| t.depends_on.is_empty())
        .map(|t| t.id.as_str())
        .collect();

    while !ready.is_empty() {
        let layer: Vec<String> = ready.iter().map(|id| id.to_string()).collect();
        let current: Vec<&str> = ready.drain(..).collect();

        for id in current {
            if let Some(next) = dependents.get(id) {
                for &dependent in next.iter() {
                    let degree = in_degree.entry(dependent).or_insert(0);
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }
        layers.push(layer);
    }

    layers
}

/// Validate a graph definition.
pub fn validate_graph(def: &GraphDefinition) -> Validation {
    if def.name.is_empty() {
        return Validation::fail("missing required field: name");
    }
    if def.nodes.is_empty() {
        return Validation::fail("missing or empty nodes list");
    }
    if def.entry_point.is_empty() {
        return Validation::fail("missing entry_point");
    }

    let mut node_ids = HashSet::new();
    for node in &def.nodes {
        if node.id.is_empty() {
            return Validation::fail("node missing id field");
        }
        if !node_ids.insert(node.id.as_str()) {
            return Validation::fail(format!("duplicate node id: {}", node.id));
        }

        match &node.kind {
            NodeKind::Agent {
                model,
                system_prompt,
                ..
            } => {
                if model.is_empty() {
                    return Validation::fail(format!("agent node '{}' missing model", node.id));
                }
                if system_prompt.is_empty() {
                    return Validation::fail(format!(
                        "agent node '{}' missing system_prompt",
                        node.id
                    ));
                }
            }
            NodeKind::Conditional { rules, .. } => {
                if rules.is_empty() {
                    return Validation::fail(format!(
                        "conditional node '{}' has no routing rules",
                        node.id
                    ));
                }
            }
            NodeKind::Human { prompt_message } => {
                if prompt_message.is_empty() {
                    return Validation::fail(format!(
                        "human node '{}' missing prompt_message",
                        node.id
                    ));
                }
            }
            NodeKind::Tool { .. } | NodeKind::Passthrough => {}
        }
    }

    if !node_ids.contains(def.entry_point.as_str()) {
        return Validation::fail(format!(
            "entry point '{}' not found in nodes",
            def.entry_point
        ));
    }

    for finish in &def.finish_points {
        if !node_ids.contains(finish.as_str()) {
            return Validation::fail(format!("finish point '{}' not found in nodes", finish));
        }
    }

    for (i, edge) in def.edges.iter().enumerate() {
        if !node_ids.contains(edge.from_node.as_str()) {
            return Validation::fail(format!(
                "edge {} from_node '{}' not found in nodes",
                i, edge.from_node
            ));
        }
        match &edge.to_node {
            EdgeTarget::Node(target) => {
                if target != END && !node_ids.contains(target.as_str()) {
                    return Validation::fail(format!(
                        "edge {} to_node '{}' not found in nodes",
                        i, target
                    ));
                }
            }
            EdgeTarget::Branches(branches) => {
                if branches.is_empty() {
                    return Validation::fail(format!("edge {} has an empty branch map", i));
                }
                for (branch, target) in branches {
                    if target != END && !node_ids.contains(target.as_str()) {
                        return Validation::fail(format!(
                            "edge {} branch '{}' targets unknown node '{}'",
                            i, branch, target
                        ));
                    }
                }
            }
        }
    }

    Validation::ok()
}
