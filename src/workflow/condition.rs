// Transition condition DSL: `field == 'value'` and `field != 'value'`

//! # Condition DSL
//!
//! Deliberately tiny: one comparison per condition, single-quoted string
//! literals only, compared against the string representation of the state
//! field. Anything the parser does not understand evaluates to **true** -
//! authors can omit or half-write conditions without stranding instances,
//! and the permissiveness is part of the contract rather than an accident.

use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Evaluate a transition condition against instance state.
pub fn evaluate(condition: &str, state: &HashMap<String, Value>) -> bool {
    let (field, literal, negated) = match parse(condition) {
        Some(parts) => parts,
        None => {
            debug!(condition, "unparseable condition, treating as true");
            return true;
        }
    };

    let actual = state.get(field).map(value_string).unwrap_or_default();
    if negated {
        actual != literal
    } else {
        actual == literal
    }
}

/// Split into `(field, literal, negated)`. `None` means unparseable.
fn parse(condition: &str) -> Option<(&str, &str, bool)> {
    let (lhs, rhs, negated) = if let Some((lhs, rhs)) = condition.split_once("!=") {
        (lhs, rhs, true)
    } else if let Some((lhs, rhs)) = condition.split_once("==") {
        (lhs, rhs, false)
    } else {
        return None;
    };

    let field = lhs.trim();
    if field.is_empty() {
        return None;
    }

    let literal = rhs.trim();
    let literal = literal.strip_prefix('\'')?.strip_suffix('\'')?;
    Some((field, literal, negated))
}

fn value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> HashMap<String, Value> {
        HashMap::from([
            ("status".to_string(), json!("approved")),
            ("priority".to_string(), json!(7)),
            ("flag".to_string(), json!(true)),
        ])
    }

    #[test]
    fn test_equality() {
        assert!(evaluate("status == 'approved'", &state()));
        assert!(!evaluate("status == 'rejected'", &state()));
    }

    #[test]
    fn test_inequality() {
        assert!(evaluate("status != 'rejected'", &state()));
        assert!(!evaluate("status != 'approved'", &state()));
    }

    #[test]
    fn test_non_string_values_compare_by_representation() {
        assert!(evaluate("priority == '7'", &state()));
        assert!(evaluate("flag == 'true'", &state()));
    }

    #[test]
    fn test_missing_field_is_empty_string() {
        assert!(!evaluate("ghost == 'x'", &state()));
        assert!(evaluate("ghost != 'x'", &state()));
    }

    #[test]
    fn test_unparseable_conditions_are_permissive() {
        assert!(evaluate("", &state()));
        assert!(evaluate("status", &state()));
        assert!(evaluate("status > 'approved'", &state()));
        assert!(evaluate("status == approved", &state())); // unquoted
        assert!(evaluate("== 'approved'", &state())); // no field
    }
}
