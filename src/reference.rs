//! Reference resolution for task inputs and workflow outputs
//!
//! References are `{{...}}` placeholder strings. `workflow.input.k` reads the
//! workflow inputs; `task_id.field.sub` walks a completed task's output.
//! Anything else passes through unchanged, so literals and references mix
//! freely in one input map. Missing keys resolve to null: the downstream task
//! owns its own input validation. `resolve_strict` is the opt-in fail-fast
//! variant.

use serde_json::{Map, Value};

use crate::error::EngineError;

const WORKFLOW_INPUT_PREFIX: &str = "workflow.input.";

/// Check whether a value is a `{{...}}` reference string.
pub fn is_reference(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.starts_with("{{") && s.ends_with("}}"))
}

/// Resolve a single value against workflow inputs and prior task results.
///
/// Non-reference values are returned unchanged. Unresolvable references
/// become `Value::Null`.
pub fn resolve(
    value: &Value,
    inputs: &Map<String, Value>,
    results: &Map<String, Value>,
) -> Value {
    match reference_path(value) {
        Some(path) => lookup(path, inputs, results).unwrap_or(Value::Null),
        None => value.clone(),
    }
}

/// Resolve a value, failing on the first unresolvable reference.
pub fn resolve_strict(
    value: &Value,
    inputs: &Map<String, Value>,
    results: &Map<String, Value>,
) -> Result<Value, EngineError> {
    match reference_path(value) {
        Some(path) => lookup(path, inputs, results).ok_or_else(|| {
            EngineError::validation(format!("unresolved reference: {{{{{}}}}}", path))
        }),
        None => Ok(value.clone()),
    }
}

/// Resolve every entry of a task input map.
pub fn resolve_inputs(
    declared: &Map<String, Value>,
    inputs: &Map<String, Value>,
    results: &Map<String, Value>,
    strict: bool,
) -> Result<Map<String, Value>, EngineError> {
    let mut resolved = Map::new();
    for (key, value) in declared {
        let value = if strict {
            resolve_strict(value, inputs, results)?
        } else {
            resolve(value, inputs, results)
        };
        resolved.insert(key.clone(), value);
    }
    Ok(resolved)
}

/// Extract the dotted path from a reference string, if the value is one.
fn reference_path(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if s.starts_with("{{") && s.ends_with("}}") && s.len() >= 4 => {
            Some(s[2..s.len() - 2].trim())
        }
        _ => None,
    }
}

fn lookup(path: &str, inputs: &Map<String, Value>, results: &Map<String, Value>) -> Option<Value> {
    if let Some(key) = path.strip_prefix(WORKFLOW_INPUT_PREFIX) {
        return inputs.get(key).cloned();
    }

    let (task_id, rest) = path.split_once('.')?;
    let mut current = results.get(task_id)?;
    for segment in rest.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_workflow_input_reference() {
        let inputs = as_map(json!({"pdf_data": "JVBERi0=", "chunk_size": 500}));
        let results = Map::new();

        let resolved = resolve(&json!("{{workflow.input.pdf_data}}"), &inputs, &results);
        assert_eq!(resolved, json!("JVBERi0="));

        let resolved = resolve(&json!("{{workflow.input.chunk_size}}"), &inputs, &results);
        assert_eq!(resolved, json!(500));
    }

    #[test]
    fn test_task_output_reference() {
        let inputs = Map::new();
        let results = as_map(json!({
            "extract": {"text": "hello", "metadata": {"pages": 3}}
        }));

        assert_eq!(
            resolve(&json!("{{extract.text}}"), &inputs, &results),
            json!("hello")
        );
        // Deeper paths traverse nested objects
        assert_eq!(
            resolve(&json!("{{extract.metadata.pages}}"), &inputs, &results),
            json!(3)
        );
    }

    #[test]
    fn test_missing_resolves_to_null() {
        let inputs = Map::new();
        let results = Map::new();

        assert_eq!(
            resolve(&json!("{{workflow.input.missing}}"), &inputs, &results),
            Value::Null
        );
        assert_eq!(
            resolve(&json!("{{nope.field}}"), &inputs, &results),
            Value::Null
        );
    }

    #[test]
    fn test_literals_pass_through() {
        let inputs = Map::new();
        let results = Map::new();

        assert_eq!(resolve(&json!(42), &inputs, &results), json!(42));
        assert_eq!(resolve(&json!(true), &inputs, &results), json!(true));
        assert_eq!(resolve(&json!("plain"), &inputs, &results), json!("plain"));
        assert_eq!(
            resolve(&json!({"nested": 1}), &inputs, &results),
            json!({"nested": 1})
        );
    }

    #[test]
    fn test_strict_mode_fails_on_missing() {
        let inputs = Map::new();
        let results = Map::new();

        let err = resolve_strict(&json!("{{workflow.input.missing}}"), &inputs, &results)
            .unwrap_err();
        assert!(err.to_string().contains("workflow.input.missing"));

        // Literals are still fine in strict mode
        assert!(resolve_strict(&json!("plain"), &inputs, &results).is_ok());
    }

    #[test]
    fn test_resolve_inputs_mixed() {
        let declared = as_map(json!({
            "content": "{{extract.text}}",
            "chunk_size": 1000,
            "missing": "{{extract.nope}}"
        }));
        let inputs = Map::new();
        let results = as_map(json!({"extract": {"text": "T"}}));

        let resolved = resolve_inputs(&declared, &inputs, &results, false).unwrap();
        assert_eq!(resolved.get("content"), Some(&json!("T")));
        assert_eq!(resolved.get("chunk_size"), Some(&json!(1000)));
        assert_eq!(resolved.get("missing"), Some(&Value::Null));
    }

    #[test]
    fn test_is_reference() {
        assert!(is_reference(&json!("{{workflow.input.x}}")));
        assert!(!is_reference(&json!("plain")));
        assert!(!is_reference(&json!(7)));
    }
}
