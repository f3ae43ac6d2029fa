//! Choice condition evaluation.
//!
//! Structured conditions (`string_equals`, `is_present`, ...) are evaluated
//! directly against the document. `expression` conditions go through a JEXL
//! evaluator with a small set of string transforms registered.
//!
//! **Security note:** documents are always passed as context objects, NEVER
//! interpolated into expression strings.

use idprov_types::path::DocPath;
use idprov_types::workflow::Condition;
use serde_json::{json, Value};

use super::document;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("Expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("Invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// WorkflowEvaluator
// ---------------------------------------------------------------------------

/// JEXL expression evaluator with standard transforms pre-registered.
///
/// Built on demand for each Choice evaluation; it is not shared across tasks.
pub struct WorkflowEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl WorkflowEvaluator {
    /// Create a new evaluator with all standard transforms registered.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.len(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate an expression to a boolean result.
    ///
    /// The `context` must be a JSON object. Expression results are coerced
    /// to boolean using JavaScript-like truthiness rules.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        let result = self
            .evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))?;

        Ok(Self::value_to_bool(&result))
    }

    /// Coerce a JSON value to boolean using JavaScript-like truthiness.
    fn value_to_bool(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

impl Default for WorkflowEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Evaluate a Choice condition against `doc`.
///
/// Comparisons against a missing path or a value of the wrong type are
/// false rather than errors. Only `expression` conditions can fail.
pub fn evaluate_condition(condition: &Condition, doc: &Value) -> Result<bool, ExpressionError> {
    let mut evaluator = None;
    evaluate(condition, doc, &mut evaluator)
}

fn evaluate(
    condition: &Condition,
    doc: &Value,
    evaluator: &mut Option<WorkflowEvaluator>,
) -> Result<bool, ExpressionError> {
    let lookup = |path: &DocPath| document::read(doc, path).ok();
    Ok(match condition {
        Condition::StringEquals { path, value } => {
            lookup(path).and_then(Value::as_str) == Some(value.as_str())
        }
        Condition::BooleanEquals { path, value } => lookup(path).and_then(Value::as_bool) == Some(*value),
        Condition::NumericEquals { path, value } => lookup(path)
            .and_then(Value::as_f64)
            .is_some_and(|n| (n - value).abs() < f64::EPSILON),
        Condition::IsPresent { path } => lookup(path).is_some(),
        Condition::And { conditions } => {
            for c in conditions {
                if !evaluate(c, doc, evaluator)? {
                    return Ok(false);
                }
            }
            true
        }
        Condition::Or { conditions } => {
            for c in conditions {
                if evaluate(c, doc, evaluator)? {
                    return Ok(true);
                }
            }
            false
        }
        Condition::Not { condition } => !evaluate(condition, doc, evaluator)?,
        Condition::Expression { expr } => evaluator
            .get_or_insert_with(WorkflowEvaluator::new)
            .evaluate_bool(expr, doc)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> DocPath {
        DocPath::parse(raw).unwrap()
    }

    fn role_doc() -> Value {
        json!({
            "role": {
                "role_type": "WS",
                "privileged_category": "non-privileged",
                "sailpoint_state_enabled": true,
                "priority": 2
            }
        })
    }

    #[test]
    fn string_equals_and_and() {
        let cond = Condition::and(vec![
            Condition::string_equals(path("$.role.role_type"), "WS"),
            Condition::string_equals(path("$.role.privileged_category"), "non-privileged"),
        ]);
        assert!(evaluate_condition(&cond, &role_doc()).unwrap());

        let cond = Condition::and(vec![
            Condition::string_equals(path("$.role.role_type"), "WS"),
            Condition::string_equals(path("$.role.privileged_category"), "privileged"),
        ]);
        assert!(!evaluate_condition(&cond, &role_doc()).unwrap());
    }

    #[test]
    fn missing_path_and_wrong_type_are_false() {
        let doc = role_doc();
        let cond = Condition::string_equals(path("$.role.permission_set_name"), "x");
        assert!(!evaluate_condition(&cond, &doc).unwrap());

        let cond = Condition::string_equals(path("$.role.priority"), "2");
        assert!(!evaluate_condition(&cond, &doc).unwrap());

        let cond = Condition::Not {
            condition: Box::new(Condition::is_present(path("$.role.permission_set_name"))),
        };
        assert!(evaluate_condition(&cond, &doc).unwrap());
    }

    #[test]
    fn boolean_numeric_and_or() {
        let doc = role_doc();
        let cond = Condition::Or {
            conditions: vec![
                Condition::BooleanEquals {
                    path: path("$.role.sailpoint_state_enabled"),
                    value: false,
                },
                Condition::NumericEquals {
                    path: path("$.role.priority"),
                    value: 2.0,
                },
            ],
        };
        assert!(evaluate_condition(&cond, &doc).unwrap());
    }

    #[test]
    fn jexl_expression() {
        let doc = role_doc();
        let cond = Condition::Expression {
            expr: "role.role_type|lower == 'ws' && role.priority > 1".into(),
        };
        assert!(evaluate_condition(&cond, &doc).unwrap());
    }

    #[test]
    fn jexl_requires_object_context() {
        let cond = Condition::Expression { expr: "true".into() };
        let err = evaluate_condition(&cond, &json!([1, 2])).unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidContext(_)));
    }

    #[test]
    fn transforms() {
        let eval = WorkflowEvaluator::new();
        let ctx = json!({ "name": "  Hello  ", "tags": ["a", "b"] });
        assert!(eval.evaluate_bool("name|trim|upper == 'HELLO'", &ctx).unwrap());
        assert!(eval.evaluate_bool("tags|length == 2", &ctx).unwrap());
        assert!(eval.evaluate_bool("name|contains('ell')", &ctx).unwrap());
    }
}
