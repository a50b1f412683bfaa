//! Condition evaluator — a pure function from `(conditions, event_data)`
//! to `bool`. No internal state; safe to call from any thread without a
//! lock.

use regex::Regex;
use serde_json::Value;

use crate::error::ConditionError;
use crate::model::{Condition, Operator};

/// Parses a rule's raw JSON condition list into typed `Condition`s.
/// Isolated from `evaluate` so the engine can skip a rule whose
/// conditions fail to parse without touching anything else.
pub fn parse_conditions(raw: &Value) -> Result<Vec<Condition>, ConditionError> {
    let array = raw.as_array().ok_or(ConditionError::NotAnArray)?;
    array
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            serde_json::from_value(entry.clone())
                .map_err(|e| ConditionError::MalformedCondition(index, e.to_string()))
        })
        .collect()
}

/// Empty list matches everything; otherwise every condition must match
/// (conjunction).
pub fn evaluate(conditions: &[Condition], data: &Value) -> bool {
    conditions.iter().all(|c| evaluate_one(c, data))
}

fn evaluate_one(condition: &Condition, data: &Value) -> bool {
    let field_value = get_field(&condition.field, data);

    match condition.operator {
        Operator::Equals => match field_value {
            Some(v) => value_to_compare_string(v) == Some(condition.value.clone()),
            None => false,
        },
        Operator::NotEquals => match field_value {
            Some(v) => value_to_compare_string(v) != Some(condition.value.clone()),
            None => false,
        },
        Operator::GreaterThan => compare_numeric(field_value, &condition.value, |a, b| a > b),
        Operator::LessThan => compare_numeric(field_value, &condition.value, |a, b| a < b),
        Operator::Contains => match field_value.and_then(value_to_compare_string) {
            Some(s) => s.to_lowercase().contains(&condition.value.to_lowercase()),
            None => false,
        },
        Operator::Regex => match field_value.and_then(value_to_compare_string) {
            Some(s) => Regex::new(&condition.value)
                .map(|re| re.is_match(&s))
                .unwrap_or(false),
            None => false,
        },
    }
}

fn compare_numeric(
    field_value: Option<&Value>,
    rhs: &str,
    cmp: impl Fn(f64, f64) -> bool,
) -> bool {
    let lhs = field_value.and_then(value_to_compare_string).and_then(|s| s.parse::<f64>().ok());
    let rhs = rhs.parse::<f64>().ok();
    match (lhs, rhs) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// Splits `path` on `.` and descends into `data`. Any missing intermediate
/// key or non-mapping intermediate yields "not present".
pub fn get_field<'a>(path: &str, data: &'a Value) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn value_to_compare_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
