//! Runtime coercion of untyped request/row values into canonical values.

use regex::Regex;
use serde_json::{Number, Value};
use std::sync::OnceLock;

/// Outcome of coercing one raw value.
///
/// `Missing` covers both "absent" and "silently rejected" (e.g. an enum value outside the
/// allowed set). `Invalid` is the not-a-number signal of the numeric kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum Coerced {
    Missing,
    Invalid,
    Value(Value),
}

impl Coerced {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Coerced::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Coerced::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Coerced::Missing)
    }
}

fn int_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([+-]?\d+)").expect("static regex"))
}

fn float_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)").expect("static regex"))
}

/// Stringification used by the string kinds and by enum membership.
fn stringify(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Base-10 integer parse of the leading numeric content; `"42abc"` → 42, `"abc"` → invalid.
pub(crate) fn coerce_int(raw: &Value) -> Coerced {
    match raw {
        Value::Null => Coerced::Missing,
        Value::Number(n) => match n.as_i64() {
            Some(i) => Coerced::Value(Value::from(i)),
            None => match n.as_f64() {
                Some(f) if f.is_finite() && f.abs() < i64::MAX as f64 => Coerced::Value(Value::from(f.trunc() as i64)),
                _ => Coerced::Invalid,
            },
        },
        Value::String(s) => int_prefix()
            .captures(s)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().trim_start_matches('+').parse::<i64>().ok())
            .map(|i| Coerced::Value(Value::from(i)))
            .unwrap_or(Coerced::Invalid),
        _ => Coerced::Invalid,
    }
}

pub(crate) fn coerce_float(raw: &Value) -> Coerced {
    let parsed = match raw {
        Value::Null => return Coerced::Missing,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => float_prefix()
            .captures(s)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok()),
        _ => None,
    };
    parsed
        .and_then(Number::from_f64)
        .map(|n| Coerced::Value(Value::Number(n)))
        .unwrap_or(Coerced::Invalid)
}

pub(crate) fn coerce_string(raw: &Value) -> Coerced {
    match raw {
        Value::Null => Coerced::Missing,
        other => Coerced::Value(Value::String(stringify(other))),
    }
}

/// Membership test compared as strings; anything outside the set is dropped, not rejected.
pub(crate) fn coerce_enum(raw: &Value, values: &[String]) -> Coerced {
    if raw.is_null() {
        return Coerced::Missing;
    }
    let s = stringify(raw);
    if values.iter().any(|v| *v == s) {
        Coerced::Value(Value::String(s))
    } else {
        Coerced::Missing
    }
}

pub(crate) fn coerce_bool(raw: &Value) -> Coerced {
    let b = match raw {
        Value::Null => return Coerced::Missing,
        Value::Bool(b) => *b,
        Value::String(s) if s == "true" => true,
        Value::String(s) if s == "false" => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::Array(_) | Value::Object(_) => true,
    };
    Coerced::Value(Value::Bool(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn int_extracts_leading_digits() {
        assert_eq!(coerce_int(&json!("42abc")), Coerced::Value(json!(42)));
        assert_eq!(coerce_int(&json!("  -7")), Coerced::Value(json!(-7)));
        assert_eq!(coerce_int(&json!(4.9)), Coerced::Value(json!(4)));
        assert_eq!(coerce_int(&json!("abc")), Coerced::Invalid);
        assert_eq!(coerce_int(&json!(true)), Coerced::Invalid);
        assert_eq!(coerce_int(&Value::Null), Coerced::Missing);
    }

    #[test]
    fn float_extracts_leading_number() {
        assert_eq!(coerce_float(&json!("3.5kg")), Coerced::Value(json!(3.5)));
        assert_eq!(coerce_float(&json!(".25")), Coerced::Value(json!(0.25)));
        assert_eq!(coerce_float(&json!("1e3")), Coerced::Value(json!(1000.0)));
        assert_eq!(coerce_float(&json!("x1")), Coerced::Invalid);
    }

    #[test]
    fn bool_accepts_literals_then_truthiness() {
        assert_eq!(coerce_bool(&json!("false")), Coerced::Value(json!(false)));
        assert_eq!(coerce_bool(&json!("true")), Coerced::Value(json!(true)));
        assert_eq!(coerce_bool(&json!("")), Coerced::Value(json!(false)));
        assert_eq!(coerce_bool(&json!("no")), Coerced::Value(json!(true)));
        assert_eq!(coerce_bool(&json!(0)), Coerced::Value(json!(false)));
        assert_eq!(coerce_bool(&json!({})), Coerced::Value(json!(true)));
    }

    #[test]
    fn string_stringifies_scalars() {
        assert_eq!(coerce_string(&json!(12)), Coerced::Value(json!("12")));
        assert_eq!(coerce_string(&json!(false)), Coerced::Value(json!("false")));
        assert_eq!(coerce_string(&Value::Null), Coerced::Missing);
    }
}
