//! Change Detection
//!
//! Decides whether writing a proposed value over a current value would be
//! observed as a change. Comparison is by value only; nothing is written.

use rust_decimal::Decimal;
use serde_json::{Number, Value};
use std::str::FromStr;

/// Check if `proposed` would change `current`.
///
/// A missing proposal, or an explicit JSON `null`, never counts as a change.
pub fn has_changed(current: Option<&Value>, proposed: Option<&Value>) -> bool {
    match proposed {
        None | Some(Value::Null) => false,
        Some(proposed) => match current {
            None => true,
            Some(current) => !values_equal(current, proposed),
        },
    }
}

/// Value equality with numeric normalization (`1` equals `1.0`).
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => left == right,
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if a == b {
        return true;
    }
    match (
        Decimal::from_str(&a.to_string()),
        Decimal::from_str(&b.to_string()),
    ) {
        (Ok(x), Ok(y)) => x == y,
        // Outside Decimal range: fall back to float comparison
        _ => a.as_f64() == b.as_f64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_absent_proposal_is_not_a_change() {
        assert!(!has_changed(Some(&json!("A")), None));
        assert!(!has_changed(None, None));
        assert!(!has_changed(Some(&json!("A")), Some(&Value::Null)));
    }

    #[test]
    fn test_equal_value_is_not_a_change() {
        assert!(!has_changed(Some(&json!("draft")), Some(&json!("draft"))));
    }

    #[test]
    fn test_different_value_is_a_change() {
        assert!(has_changed(Some(&json!("A")), Some(&json!("B"))));
        assert!(has_changed(None, Some(&json!("B"))));
        assert!(has_changed(Some(&Value::Null), Some(&json!(false))));
    }

    #[test]
    fn test_numbers_compare_numerically() {
        assert!(!has_changed(Some(&json!(1)), Some(&json!(1.0))));
        assert!(has_changed(Some(&json!(1)), Some(&json!(1.5))));
        assert!(has_changed(Some(&json!(0.1 + 0.2)), Some(&json!(0.3))));
    }

    #[test]
    fn test_decimal_strings_compare_as_strings() {
        let price = Value::String(dec!(10.50).to_string());
        assert!(!has_changed(Some(&price), Some(&json!("10.50"))));
        assert!(has_changed(Some(&price), Some(&json!("10.5"))));
    }

    #[test]
    fn test_nested_values() {
        assert!(!has_changed(
            Some(&json!({"tags": ["a", 1]})),
            Some(&json!({"tags": ["a", 1.0]}))
        ));
        assert!(has_changed(
            Some(&json!({"tags": ["a"]})),
            Some(&json!({"tags": ["a", "b"]}))
        ));
    }

    #[test]
    fn test_type_change_is_a_change() {
        assert!(has_changed(Some(&json!("1")), Some(&json!(1))));
    }
}
