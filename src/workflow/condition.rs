//! Single-predicate evaluation for condition nodes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    common::Vars,
    workflow::{node::NodeConfig, template},
};

/// Comparison operator
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString, strum::EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    GreaterThanEquals,
    LessThanEquals,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConditionConfig {
    /// dot path into the run context
    pub field: String,
    pub operator: Operator,
    /// right-hand operand, unused by the emptiness checks
    #[serde(default)]
    pub value: Value,
}

impl NodeConfig for ConditionConfig {
    fn schema() -> Value {
        let operators = <Operator as strum::IntoEnumIterator>::iter().map(|op| op.as_ref().to_string()).collect::<Vec<_>>();
        serde_json::json!({
            "type": "object",
            "required": ["field", "operator"],
            "properties": {
                "field": { "type": "string", "minLength": 1 },
                "operator": { "type": "string", "enum": operators },
                "value": { "type": ["string", "number", "boolean", "null"] }
            }
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("type mismatch on '{field}': {detail}")]
    TypeMismatch {
        field: String,
        detail: String,
    },
}

fn coerce_string(value: Option<&Value>) -> String {
    value.map(template::render_value).unwrap_or_default()
}

fn coerce_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        _ => false,
    }
}

/// Evaluates the predicate. Numeric operators fail with `TypeMismatch` when
/// either side does not coerce to a number.
pub fn evaluate(
    config: &ConditionConfig,
    ctx: &Vars,
) -> Result<bool, ConditionError> {
    let actual = template::lookup(ctx, &config.field);
    let expected = &config.value;

    let text = |f: fn(&str, &str) -> bool| match actual {
        Some(Value::String(s)) => f(s, &coerce_string(Some(expected))),
        _ => false,
    };

    let numeric = |f: fn(f64, f64) -> bool| match (coerce_number(actual), coerce_number(Some(expected))) {
        (Some(a), Some(b)) => Ok(f(a, b)),
        (None, _) => Err(ConditionError::TypeMismatch {
            field: config.field.clone(),
            detail: format!("value {} is not numeric", actual.map(Value::to_string).unwrap_or_else(|| "<missing>".to_string())),
        }),
        (_, None) => Err(ConditionError::TypeMismatch {
            field: config.field.clone(),
            detail: format!("operand {} is not numeric", expected),
        }),
    };

    match config.operator {
        Operator::Equals => Ok(coerce_string(actual) == coerce_string(Some(expected))),
        Operator::NotEquals => Ok(coerce_string(actual) != coerce_string(Some(expected))),
        Operator::Contains => Ok(text(|a, b| a.contains(b))),
        Operator::NotContains => Ok(match actual {
            Some(Value::String(s)) => !s.contains(&coerce_string(Some(expected))),
            _ => true,
        }),
        Operator::StartsWith => Ok(text(|a, b| a.starts_with(b))),
        Operator::EndsWith => Ok(text(|a, b| a.ends_with(b))),
        Operator::GreaterThan => numeric(|a, b| a > b),
        Operator::LessThan => numeric(|a, b| a < b),
        Operator::GreaterThanEquals => numeric(|a, b| a >= b),
        Operator::LessThanEquals => numeric(|a, b| a <= b),
        Operator::IsEmpty => Ok(is_empty(actual)),
        Operator::IsNotEmpty => Ok(!is_empty(actual)),
    }
}

/// Engine policy: a type mismatch selects the `false` branch and is reported as a warning.
pub fn evaluate_lenient(
    config: &ConditionConfig,
    ctx: &Vars,
) -> (bool, Option<String>) {
    match evaluate(config, ctx) {
        Ok(result) => (result, None),
        Err(err) => (false, Some(err.to_string())),
    }
}
