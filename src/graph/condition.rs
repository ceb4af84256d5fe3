//! Declarative routing rules for conditional nodes
//!
//! The original system evaluated user-supplied code to pick the next node.
//! Here routing is data: an ordered rule table over state fields. Each rule
//! names a dotted field path, a comparison, and the branch to take when it
//! matches; the first match wins and a default catches the rest.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::state::GraphState;

/// Comparison operator applied to a state field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Field is present (any value, including null)
    Exists,
    /// Field is present and truthy (non-null, non-false, non-zero, non-empty)
    Truthy,
}

/// A single routing rule: `field op value -> branch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Dotted path into the state, e.g. `analysis.score`
    pub field: String,

    pub op: RuleOp,

    /// Comparison operand; unused for `exists` and `truthy`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Branch label (or node id) taken when the rule matches
    pub branch: String,
}

/// Evaluate a rule table against the state.
///
/// Returns the first matching rule's branch, the default otherwise, or
/// `None` when nothing matches and no default is set.
pub fn evaluate(
    rules: &[RoutingRule],
    default: Option<&str>,
    state: &GraphState,
) -> Option<String> {
    for rule in rules {
        let actual = field_value(state, &rule.field);
        if matches(rule, actual) {
            return Some(rule.branch.clone());
        }
    }
    default.map(|d| d.to_string())
}

fn matches(rule: &RoutingRule, actual: Option<&Value>) -> bool {
    match rule.op {
        RuleOp::Exists => actual.is_some(),
        RuleOp::Truthy => actual.map(is_truthy).unwrap_or(false),
        RuleOp::Eq => match (actual, &rule.value) {
            (Some(a), Some(expected)) => a == expected,
            _ => false,
        },
        RuleOp::Ne => match (actual, &rule.value) {
            (Some(a), Some(expected)) => a != expected,
            _ => false,
        },
        RuleOp::Gt | RuleOp::Gte | RuleOp::Lt | RuleOp::Lte => {
            let (Some(a), Some(expected)) = (actual, &rule.value) else {
                return false;
            };
            let (Some(a), Some(b)) = (a.as_f64(), expected.as_f64()) else {
                return false;
            };
            match rule.op {
                RuleOp::Gt => a > b,
                RuleOp::Gte => a >= b,
                RuleOp::Lt => a < b,
                RuleOp::Lte => a <= b,
                _ => unreachable!(),
            }
        }
    }
}

/// Walk a dotted path into the state.
fn field_value<'a>(state: &'a GraphState, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = state.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: Value) -> GraphState {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn rule(field: &str, op: RuleOp, value: Option<Value>, branch: &str) -> RoutingRule {
        RoutingRule {
            field: field.to_string(),
            op,
            value,
            branch: branch.to_string(),
        }
    }

    #[test]
    fn test_first_match_wins() {
        let rules = vec![
            rule("score", RuleOp::Gte, Some(json!(0.9)), "accept"),
            rule("score", RuleOp::Gte, Some(json!(0.5)), "revise"),
        ];
        let s = state(json!({"score": 0.95}));
        assert_eq!(evaluate(&rules, Some("reject"), &s), Some("accept".into()));

        let s = state(json!({"score": 0.6}));
        assert_eq!(evaluate(&rules, Some("reject"), &s), Some("revise".into()));
    }

    #[test]
    fn test_default_branch() {
        let rules = vec![rule("approved", RuleOp::Truthy, None, "done")];
        let s = state(json!({"approved": false}));
        assert_eq!(evaluate(&rules, Some("retry"), &s), Some("retry".into()));
        assert_eq!(evaluate(&rules, None, &s), None);
    }

    #[test]
    fn test_eq_and_ne() {
        let rules = vec![rule("phase", RuleOp::Eq, Some(json!("explore")), "explore")];
        let s = state(json!({"phase": "explore"}));
        assert_eq!(evaluate(&rules, None, &s), Some("explore".into()));

        let rules = vec![rule("phase", RuleOp::Ne, Some(json!("done")), "continue")];
        assert_eq!(evaluate(&rules, None, &s), Some("continue".into()));
    }

    #[test]
    fn test_missing_field_is_no_match() {
        let rules = vec![
            rule("missing", RuleOp::Eq, Some(json!(1)), "a"),
            rule("missing", RuleOp::Ne, Some(json!(1)), "b"),
            rule("missing", RuleOp::Gt, Some(json!(0)), "c"),
        ];
        let s = state(json!({}));
        assert_eq!(evaluate(&rules, Some("fallback"), &s), Some("fallback".into()));
    }

    #[test]
    fn test_exists_and_truthy() {
        let s = state(json!({"present_null": null, "flag": true, "empty": ""}));

        let rules = vec![rule("present_null", RuleOp::Exists, None, "has")];
        assert_eq!(evaluate(&rules, None, &s), Some("has".into()));

        let rules = vec![rule("present_null", RuleOp::Truthy, None, "yes")];
        assert_eq!(evaluate(&rules, Some("no"), &s), Some("no".into()));

        let rules = vec![rule("flag", RuleOp::Truthy, None, "yes")];
        assert_eq!(evaluate(&rules, Some("no"), &s), Some("yes".into()));

        let rules = vec![rule("empty", RuleOp::Truthy, None, "yes")];
        assert_eq!(evaluate(&rules, Some("no"), &s), Some("no".into()));
    }

    #[test]
    fn test_dotted_field_path() {
        let rules = vec![rule(
            "analysis.score",
            RuleOp::Gt,
            Some(json!(0.5)),
            "good",
        )];
        let s = state(json!({"analysis": {"score": 0.8}}));
        assert_eq!(evaluate(&rules, Some("bad"), &s), Some("good".into()));
    }

    #[test]
    fn test_numeric_compare_across_int_and_float() {
        let rules = vec![rule("retries", RuleOp::Lt, Some(json!(3)), "again")];
        let s = state(json!({"retries": 2}));
        assert_eq!(evaluate(&rules, Some("stop"), &s), Some("again".into()));

        let s = state(json!({"retries": 3}));
        assert_eq!(evaluate(&rules, Some("stop"), &s), Some("stop".into()));
    }
}
