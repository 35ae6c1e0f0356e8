//! Condition predicates shared by permissions and policies.

use crate::{AccessError, AccessResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request context: a JSON object addressed by dot paths.
pub type Context = serde_json::Map<String, Value>;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    /// Strict equality.
    #[serde(rename = "==")]
    Eq,
    /// Strict inequality.
    #[serde(rename = "!=")]
    Ne,
    /// Numeric greater than.
    #[serde(rename = ">")]
    Gt,
    /// Numeric less than.
    #[serde(rename = "<")]
    Lt,
    /// Substring check on the string form of the field.
    #[serde(rename = "contains")]
    Contains,
    /// Membership in the condition's array value.
    #[serde(rename = "in")]
    In,
}

impl std::fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Contains => "contains",
            Self::In => "in",
        };
        write!(f, "{}", op)
    }
}

/// Field comparison attached to a permission or policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dot path into the context object.
    pub field: String,
    /// Operator.
    pub operator: ConditionOperator,
    /// Literal or template placeholder.
    pub value: Value,
}

impl Condition {
    /// Creates a new condition.
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// `field == value`.
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, ConditionOperator::Eq, value)
    }

    /// `field != value`.
    pub fn not_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, ConditionOperator::Ne, value)
    }

    /// `field in values`.
    pub fn one_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self::new(
            field,
            ConditionOperator::In,
            Value::Array(values.into_iter().map(Into::into).collect()),
        )
    }
}

/// Placeholder values resolved for a single evaluation.
#[derive(Debug, Clone)]
pub struct Bindings {
    user_id: String,
    now_ms: i64,
}

impl Bindings {
    /// Creates bindings for a request.
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            now_ms: now.timestamp_millis(),
        }
    }

    /// Creates bindings stamped with the current time.
    pub fn now(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Utc::now())
    }

    /// Looks up a placeholder such as `{{userId}}`.
    fn lookup(&self, raw: &str) -> Option<Value> {
        let name = raw.strip_prefix("{{")?.strip_suffix("}}")?.trim();
        match name {
            "userId" => Some(Value::String(self.user_id.clone())),
            "now" => Some(Value::from(self.now_ms)),
            _ => None,
        }
    }

    /// Substitutes whole-value placeholders, descending into arrays.
    pub fn substitute(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.lookup(s).unwrap_or_else(|| value.clone()),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.substitute(v)).collect()),
            other => other.clone(),
        }
    }
}

/// Condition evaluator.
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Evaluates all conditions (logical AND, empty is true).
    pub fn evaluate(conditions: &[Condition], context: &Context, bindings: &Bindings) -> AccessResult<bool> {
        for condition in conditions {
            if !Self::evaluate_one(condition, context, bindings)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluates a single condition.
    pub fn evaluate_one(condition: &Condition, context: &Context, bindings: &Bindings) -> AccessResult<bool> {
        let expected = bindings.substitute(&condition.value);

        if condition.operator == ConditionOperator::In && !expected.is_array() {
            return Err(AccessError::InvalidCondition(format!(
                "operator 'in' on '{}' requires an array value",
                condition.field
            )));
        }

        let actual = match resolve_path(context, &condition.field) {
            Some(v) => v,
            None => return Ok(condition.operator == ConditionOperator::Ne),
        };

        let result = match condition.operator {
            ConditionOperator::Eq => strict_eq(actual, &expected),
            ConditionOperator::Ne => !strict_eq(actual, &expected),
            ConditionOperator::Gt => to_number(actual) > to_number(&expected),
            ConditionOperator::Lt => to_number(actual) < to_number(&expected),
            ConditionOperator::Contains => to_js_string(actual).contains(&to_js_string(&expected)),
            ConditionOperator::In => expected
                .as_array()
                .map_or(false, |items| items.iter().any(|item| strict_eq(actual, item))),
        };

        Ok(result)
    }
}

/// Resolves a dot path (`resource.owner.id`) against the context.
pub fn resolve_path<'a>(context: &'a Context, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn strict_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64() == r.as_f64(),
        _ => left == right,
    }
}

/// Numeric coercion with `Number()` semantics; non-numeric yields NaN.
fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                match trimmed {
                    "Infinity" | "+Infinity" => f64::INFINITY,
                    "-Infinity" => f64::NEG_INFINITY,
                    _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
                }
            }
        }
        Value::Array(items) => match items.as_slice() {
            [] => 0.0,
            [single] => to_number(&Value::String(to_js_string(single))),
            _ => f64::NAN,
        },
        Value::Object(_) => f64::NAN,
    }
}

/// String coercion with `String()` semantics.
fn to_js_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                if f.fract() == 0.0 && f.abs() < 1e21 {
                    format!("{}", f as i64)
                } else {
                    f.to_string()
                }
            }
        }
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => to_js_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Context {
        match value {
            Value::Object(map) => map,
            _ => panic!("context must be an object"),
        }
    }

    fn bindings() -> Bindings {
        Bindings::new("user-1", DateTime::from_timestamp_millis(1_700_000_000_000).unwrap())
    }

    #[test]
    fn test_empty_conditions_pass() {
        assert!(ConditionEvaluator::evaluate(&[], &Context::new(), &bindings()).unwrap());
    }

    #[test]
    fn test_dot_path_resolution() {
        let context = ctx(json!({"resource": {"owner": {"id": "u1"}}, "tags": ["a", "b"]}));

        assert_eq!(resolve_path(&context, "resource.owner.id"), Some(&json!("u1")));
        assert_eq!(resolve_path(&context, "tags.1"), Some(&json!("b")));
        assert_eq!(resolve_path(&context, "resource.missing"), None);
        assert_eq!(resolve_path(&context, "resource.owner.id.deeper"), None);
    }

    #[test]
    fn test_missing_field_semantics() {
        let context = Context::new();
        let b = bindings();

        assert!(ConditionEvaluator::evaluate_one(&Condition::not_equals("x", 1), &context, &b).unwrap());
        assert!(!ConditionEvaluator::evaluate_one(&Condition::equals("x", 1), &context, &b).unwrap());
        assert!(!ConditionEvaluator::evaluate_one(
            &Condition::new("x", ConditionOperator::Gt, 1),
            &context,
            &b
        )
        .unwrap());
        assert!(!ConditionEvaluator::evaluate_one(&Condition::one_of("x", [1, 2]), &context, &b).unwrap());
    }

    #[test]
    fn test_strict_equality() {
        let context = ctx(json!({"count": 1, "label": "1"}));
        let b = bindings();

        assert!(ConditionEvaluator::evaluate_one(&Condition::equals("count", 1.0), &context, &b).unwrap());
        assert!(!ConditionEvaluator::evaluate_one(&Condition::equals("label", 1), &context, &b).unwrap());
        assert!(ConditionEvaluator::evaluate_one(&Condition::not_equals("label", 1), &context, &b).unwrap());
    }

    #[test]
    fn test_numeric_coercion() {
        let context = ctx(json!({"size": "42", "name": "abc", "flag": true}));
        let b = bindings();

        assert!(ConditionEvaluator::evaluate_one(
            &Condition::new("size", ConditionOperator::Gt, 40),
            &context,
            &b
        )
        .unwrap());
        assert!(ConditionEvaluator::evaluate_one(
            &Condition::new("flag", ConditionOperator::Lt, 2),
            &context,
            &b
        )
        .unwrap());

        // NaN never compares
        let gt = Condition::new("name", ConditionOperator::Gt, 0);
        let lt = Condition::new("name", ConditionOperator::Lt, 0);
        assert!(!ConditionEvaluator::evaluate_one(&gt, &context, &b).unwrap());
        assert!(!ConditionEvaluator::evaluate_one(&lt, &context, &b).unwrap());
    }

    #[test]
    fn test_contains_on_coerced_values() {
        let context = ctx(json!({"title": "Quarterly report", "code": 12345}));
        let b = bindings();

        let cond = Condition::new("title", ConditionOperator::Contains, "report");
        assert!(ConditionEvaluator::evaluate_one(&cond, &context, &b).unwrap());

        let cond = Condition::new("code", ConditionOperator::Contains, 234);
        assert!(ConditionEvaluator::evaluate_one(&cond, &context, &b).unwrap());
    }

    #[test]
    fn test_in_requires_array() {
        let context = ctx(json!({"status": "active"}));
        let b = bindings();

        assert!(ConditionEvaluator::evaluate_one(
            &Condition::one_of("status", ["active", "pending"]),
            &context,
            &b
        )
        .unwrap());

        let malformed = Condition::new("status", ConditionOperator::In, "active");
        let err = ConditionEvaluator::evaluate_one(&malformed, &context, &b).unwrap_err();
        assert_eq!(err.code(), "INVALID_CONDITION");
    }

    #[test]
    fn test_placeholder_substitution() {
        let b = bindings();
        let context = ctx(json!({"ownerId": "user-1", "expiresAt": 1_800_000_000_000i64}));

        assert!(ConditionEvaluator::evaluate_one(
            &Condition::equals("ownerId", "{{userId}}"),
            &context,
            &b
        )
        .unwrap());
        assert!(ConditionEvaluator::evaluate_one(
            &Condition::new("expiresAt", ConditionOperator::Gt, "{{now}}"),
            &context,
            &b
        )
        .unwrap());
        assert!(ConditionEvaluator::evaluate_one(
            &Condition::one_of("ownerId", ["{{userId}}", "admin"]),
            &context,
            &b
        )
        .unwrap());
    }

    #[test]
    fn test_literal_braces_are_not_templates() {
        let b = bindings();
        let context = ctx(json!({"note": "{{userId}} literal"}));

        // Only whole-value placeholders are substituted.
        assert_eq!(b.substitute(&json!("{{userId}} literal")), json!("{{userId}} literal"));
        assert_eq!(b.substitute(&json!("{{unknown}}")), json!("{{unknown}}"));
        assert!(ConditionEvaluator::evaluate_one(
            &Condition::equals("note", "{{userId}} literal"),
            &context,
            &b
        )
        .unwrap());
    }

    #[test]
    fn test_operator_serde() {
        let cond: Condition =
            serde_json::from_value(json!({"field": "a", "operator": "==", "value": 1})).unwrap();
        assert_eq!(cond.operator, ConditionOperator::Eq);

        let raw = serde_json::to_value(Condition::one_of("a", [1])).unwrap();
        assert_eq!(raw["operator"], json!("in"));
    }
}
