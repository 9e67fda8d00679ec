//! Value identity, fuzzy equality, and scalar typing.
//!
//! Bindings established during merge/render are compared with a fuzzy
//! equality: structural equality, string-equal scalar forms, or equal
//! canonical ids. Canonical ids are ahash fingerprints of the serialized
//! value, shared with the caching layer.

use ahash::AHasher;
use serde_json::Value;
use std::hash::{Hash, Hasher};

/// Declared scalar conversion for a scalar schema slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Null,
    String,
    Number,
    Boolean,
    BigInt,
}

impl ScalarKind {
    /// Infer the scalar kind of a literal template value.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(ScalarKind::Null),
            Value::Bool(_) => Some(ScalarKind::Boolean),
            Value::Number(_) => Some(ScalarKind::Number),
            Value::String(_) => Some(ScalarKind::String),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::Null => "null",
            ScalarKind::String => "string",
            ScalarKind::Number => "number",
            ScalarKind::Boolean => "boolean",
            ScalarKind::BigInt => "bigint",
        }
    }
}

/// Canonical id of a value: an ahash fingerprint of its serialization.
pub fn value_id(value: &Value) -> u64 {
    let serialized = serde_json::to_string(value).unwrap_or_default();
    let mut hasher = AHasher::default();
    serialized.hash(&mut hasher);
    hasher.finish()
}

/// Render a scalar value to its string form, as patterns see it.
///
/// Non-scalar values have no string form and return `None`.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Fuzzy equality between an existing binding and a redefinition:
/// structural equality, string-equal scalar forms, or equal canonical ids.
pub fn fuzzy_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if let (Some(sa), Some(sb)) = (scalar_string(a), scalar_string(b)) {
        if sa == sb {
            return true;
        }
    }
    value_id(a) == value_id(b)
}

/// Convert a captured string back to a typed scalar value.
///
/// `bigint` values that exceed the `i64`/`u64` range stay digit strings,
/// since plain JSON numbers cannot carry them.
pub fn convert_scalar(text: &str, kind: ScalarKind) -> Option<Value> {
    match kind {
        ScalarKind::String => Some(Value::String(text.to_string())),
        ScalarKind::Null => {
            if text == "null" {
                Some(Value::Null)
            } else {
                None
            }
        }
        ScalarKind::Boolean => match text {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        ScalarKind::Number => serde_json::from_str::<serde_json::Number>(text)
            .ok()
            .map(Value::Number),
        ScalarKind::BigInt => {
            if !text.chars().enumerate().all(|(i, c)| {
                c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))
            }) {
                return None;
            }
            if let Ok(n) = text.parse::<i64>() {
                Some(Value::Number(n.into()))
            } else if let Ok(n) = text.parse::<u64>() {
                Some(Value::Number(n.into()))
            } else {
                Some(Value::String(text.to_string()))
            }
        }
    }
}

/// Parse a literal string into the scalar it spells, if any.
///
/// Used when matching typed scalars against observed text: `"30"` becomes
/// `30` for a number-typed slot but stays text for a string-typed slot.
pub fn retype_captured(text: &str, kind: Option<ScalarKind>) -> Value {
    match kind {
        Some(kind) => convert_scalar(text, kind).unwrap_or_else(|| Value::String(text.to_string())),
        None => Value::String(text.to_string()),
    }
}
