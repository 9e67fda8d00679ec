//! Evaluation of compiled expressions against a binding callback.
//!
//! The binder resolves identifier paths; it may recurse back into the
//! engine to render identifiers lazily. Unresolved identifiers surface as
//! `SchemaError::Undefined` so callers can treat the expression as pending
//! rather than failed.

use super::compiled::{BinaryOp, CompiledExpr, Conversion, UnaryOp};
use crate::error::{ExprError, SchemaError};
use crate::path_utils;
use crate::values::scalar_string;
use serde_json::Value;

/// Resolves identifier paths during expression evaluation.
pub trait Binder {
    fn lookup(&mut self, path: &str) -> Result<Option<Value>, SchemaError>;
}

/// A binder over a plain JSON object; paths traverse nested values.
pub struct MapBinder<'a> {
    pub root: &'a Value,
}

impl Binder for MapBinder<'_> {
    fn lookup(&mut self, path: &str) -> Result<Option<Value>, SchemaError> {
        Ok(path_utils::lookup_path(self.root, path).cloned())
    }
}

const RECURSION_LIMIT: usize = 1000;

/// Evaluate a compiled expression. `source` is carried for error context.
pub fn evaluate_expr(
    expr: &CompiledExpr,
    source: &str,
    binder: &mut dyn Binder,
) -> Result<Value, SchemaError> {
    eval(expr, source, binder, 0)
}

fn eval(
    expr: &CompiledExpr,
    source: &str,
    binder: &mut dyn Binder,
    depth: usize,
) -> Result<Value, SchemaError> {
    if depth > RECURSION_LIMIT {
        return Err(ExprError::RecursionLimit {
            source_text: source.to_string(),
        }
        .into());
    }

    match expr {
        CompiledExpr::Null => Ok(Value::Null),
        CompiledExpr::Bool(b) => Ok(Value::Bool(*b)),
        CompiledExpr::Number(text) => parse_number(text, source),
        CompiledExpr::Str(text) => Ok(Value::String(text.clone())),
        CompiledExpr::Ident(path) => lookup_ident(path, binder),
        CompiledExpr::Unary(op, inner) => {
            let value = eval(inner, source, binder, depth + 1)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => {
                    let n = as_number(&value, source, "unary '-'")?;
                    Ok(number_value(-n))
                }
            }
        }
        CompiledExpr::Binary(op, a, b) => eval_binary(*op, a, b, source, binder, depth),
        CompiledExpr::Ternary(cond, then, otherwise) => {
            let cond = eval(cond, source, binder, depth + 1)?;
            if truthy(&cond) {
                eval(then, source, binder, depth + 1)
            } else {
                eval(otherwise, source, binder, depth + 1)
            }
        }
        CompiledExpr::Method(target, method, args) => {
            let target = eval(target, source, binder, depth + 1)?;
            let args = args
                .iter()
                .map(|arg| eval(arg, source, binder, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            eval_method(&target, method, &args, source)
        }
        CompiledExpr::Convert(conv, inner) => {
            let value = eval(inner, source, binder, depth + 1)?;
            match conv {
                Conversion::String => Ok(Value::String(stringify(&value))),
                Conversion::Boolean => Ok(Value::Bool(truthy(&value))),
                Conversion::Number => {
                    let n = as_number(&value, source, "Number()")?;
                    Ok(number_value(n))
                }
            }
        }
    }
}

fn lookup_ident(path: &str, binder: &mut dyn Binder) -> Result<Value, SchemaError> {
    if let Some(value) = binder.lookup(path)? {
        return Ok(value);
    }

    // `x.length` falls back to a property read when `x` itself resolves.
    if let Some(prefix) = path.strip_suffix(".length") {
        if let Some(value) = binder.lookup(prefix)? {
            let len = match &value {
                Value::String(s) => Some(s.chars().count()),
                Value::Array(a) => Some(a.len()),
                _ => None,
            };
            if let Some(len) = len {
                return Ok(Value::Number(len.into()));
            }
        }
    }

    Err(SchemaError::Undefined {
        name: path.to_string(),
    })
}

fn eval_binary(
    op: BinaryOp,
    a: &CompiledExpr,
    b: &CompiledExpr,
    source: &str,
    binder: &mut dyn Binder,
    depth: usize,
) -> Result<Value, SchemaError> {
    // Short-circuit forms first.
    if op == BinaryOp::And {
        let left = eval(a, source, binder, depth + 1)?;
        if !truthy(&left) {
            return Ok(left);
        }
        return eval(b, source, binder, depth + 1);
    }
    if op == BinaryOp::Or {
        let left = eval(a, source, binder, depth + 1)?;
        if truthy(&left) {
            return Ok(left);
        }
        return eval(b, source, binder, depth + 1);
    }

    let left = eval(a, source, binder, depth + 1)?;
    let right = eval(b, source, binder, depth + 1)?;

    match op {
        BinaryOp::Add => {
            if left.is_number() && right.is_number() {
                let (x, y) = (
                    as_number(&left, source, "'+'")?,
                    as_number(&right, source, "'+'")?,
                );
                Ok(number_value(x + y))
            } else {
                Ok(Value::String(format!(
                    "{}{}",
                    stringify(&left),
                    stringify(&right)
                )))
            }
        }
        BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => {
            let x = as_number(&left, source, "arithmetic")?;
            let y = as_number(&right, source, "arithmetic")?;
            let out = match op {
                BinaryOp::Subtract => x - y,
                BinaryOp::Multiply => x * y,
                BinaryOp::Divide => x / y,
                _ => x % y,
            };
            if !out.is_finite() {
                return Err(ExprError::Evaluation {
                    source_text: source.to_string(),
                    reason: "non-finite arithmetic result".to_string(),
                }
                .into());
            }
            Ok(number_value(out))
        }
        BinaryOp::Equal => Ok(Value::Bool(loose_eq(&left, &right))),
        BinaryOp::NotEqual => Ok(Value::Bool(!loose_eq(&left, &right))),
        BinaryOp::LessThan
        | BinaryOp::LessThanOrEqual
        | BinaryOp::GreaterThan
        | BinaryOp::GreaterThanOrEqual => {
            let ordering = compare(&left, &right, source)?;
            Ok(Value::Bool(match op {
                BinaryOp::LessThan => ordering.is_lt(),
                BinaryOp::LessThanOrEqual => ordering.is_le(),
                BinaryOp::GreaterThan => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn eval_method(
    target: &Value,
    method: &str,
    args: &[Value],
    source: &str,
) -> Result<Value, SchemaError> {
    let err = |reason: String| -> SchemaError {
        ExprError::Evaluation {
            source_text: source.to_string(),
            reason,
        }
        .into()
    };

    match (target, method) {
        (Value::String(s), "toUpperCase") => Ok(Value::String(s.to_uppercase())),
        (Value::String(s), "toLowerCase") => Ok(Value::String(s.to_lowercase())),
        (Value::String(s), "trim") => Ok(Value::String(s.trim().to_string())),
        (Value::String(s), "toString") => Ok(Value::String(s.clone())),
        (Value::String(s), "slice") => {
            let chars: Vec<char> = s.chars().collect();
            let start = slice_bound(args.first(), 0, chars.len());
            let end = slice_bound(args.get(1), chars.len() as i64, chars.len());
            let out: String = if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            };
            Ok(Value::String(out))
        }
        (Value::String(s), "concat") => {
            let mut out = s.clone();
            for arg in args {
                out.push_str(&stringify(arg));
            }
            Ok(Value::String(out))
        }
        (Value::String(s), "replace") => {
            let from = args
                .first()
                .and_then(|v| v.as_str())
                .ok_or_else(|| err("replace expects string arguments".into()))?;
            let to = args
                .get(1)
                .and_then(|v| v.as_str())
                .ok_or_else(|| err("replace expects string arguments".into()))?;
            Ok(Value::String(s.replacen(from, to, 1)))
        }
        (Value::String(s), "includes") => {
            let needle = args.first().map(stringify).unwrap_or_default();
            Ok(Value::Bool(s.contains(&needle)))
        }
        (Value::String(s), "startsWith") => {
            let needle = args.first().map(stringify).unwrap_or_default();
            Ok(Value::Bool(s.starts_with(&needle)))
        }
        (Value::String(s), "endsWith") => {
            let needle = args.first().map(stringify).unwrap_or_default();
            Ok(Value::Bool(s.ends_with(&needle)))
        }
        (Value::String(s), "padStart") | (Value::String(s), "padEnd") => {
            let width = args
                .first()
                .and_then(Value::as_u64)
                .ok_or_else(|| err(format!("{method} expects a length")))? as usize;
            let fill = args
                .get(1)
                .and_then(|v| v.as_str())
                .unwrap_or(" ")
                .to_string();
            let mut out = s.clone();
            if fill.is_empty() {
                return Ok(Value::String(out));
            }
            let mut pad = String::new();
            while s.chars().count() + pad.chars().count() < width {
                pad.push_str(&fill);
            }
            let pad: String = pad
                .chars()
                .take(width.saturating_sub(s.chars().count()))
                .collect();
            if method == "padStart" {
                out = format!("{pad}{out}");
            } else {
                out.push_str(&pad);
            }
            Ok(Value::String(out))
        }
        (Value::String(s), "split") => {
            let sep = args
                .first()
                .and_then(|v| v.as_str())
                .ok_or_else(|| err("split expects a separator".into()))?;
            Ok(Value::Array(
                s.split(sep)
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            ))
        }
        (Value::Array(items), "join") => {
            let sep = args.first().map(stringify).unwrap_or_else(|| ",".into());
            Ok(Value::String(
                items
                    .iter()
                    .map(stringify)
                    .collect::<Vec<_>>()
                    .join(&sep),
            ))
        }
        (Value::Array(items), "includes") => {
            let needle = args.first().cloned().unwrap_or(Value::Null);
            Ok(Value::Bool(items.iter().any(|v| loose_eq(v, &needle))))
        }
        (Value::Number(n), "toString") => Ok(Value::String(n.to_string())),
        (Value::Number(n), "toFixed") => {
            let digits = args.first().and_then(Value::as_u64).unwrap_or(0) as usize;
            let f = n.as_f64().unwrap_or(0.0);
            Ok(Value::String(format!("{f:.digits$}")))
        }
        _ => Err(err(format!(
            "no method {method:?} on {}",
            type_name(target)
        ))),
    }
}

fn slice_bound(arg: Option<&Value>, default: i64, len: usize) -> usize {
    let raw = arg
        .and_then(Value::as_i64)
        .unwrap_or(default);
    if raw < 0 {
        len.saturating_sub(raw.unsigned_abs() as usize)
    } else {
        (raw as usize).min(len)
    }
}

/// JS-style truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Loose equality: structural, or equal scalar string forms.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (scalar_string(a), scalar_string(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn compare(a: &Value, b: &Value, source: &str) -> Result<std::cmp::Ordering, SchemaError> {
    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
        return x.partial_cmp(&y).ok_or_else(|| {
            ExprError::Evaluation {
                source_text: source.to_string(),
                reason: "incomparable numbers".to_string(),
            }
            .into()
        });
    }
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Ok(x.cmp(y));
    }
    Err(ExprError::Evaluation {
        source_text: source.to_string(),
        reason: format!("cannot compare {} with {}", type_name(a), type_name(b)),
    }
    .into())
}

/// Render a value to its string form for concatenation.
pub fn stringify(value: &Value) -> String {
    scalar_string(value).unwrap_or_else(|| value.to_string())
}

fn as_number(value: &Value, source: &str, context: &str) -> Result<f64, SchemaError> {
    match value {
        Value::Number(n) => Ok(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| {
            ExprError::Evaluation {
                source_text: source.to_string(),
                reason: format!("{context}: {s:?} is not a number"),
            }
            .into()
        }),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Null => Ok(0.0),
        other => Err(ExprError::Evaluation {
            source_text: source.to_string(),
            reason: format!("{context}: {} is not a number", type_name(other)),
        }
        .into()),
    }
}

/// Collapse a float back to an integer JSON number when it is whole.
fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::Number((f as i64).into())
    } else {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_number(text: &str, source: &str) -> Result<Value, SchemaError> {
    serde_json::from_str::<serde_json::Number>(text)
        .map(Value::Number)
        .map_err(|_| {
            ExprError::Evaluation {
                source_text: source.to_string(),
                reason: format!("malformed number literal {text:?}"),
            }
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile_expr;
    use serde_json::json;

    fn run(source: &str, data: Value) -> Result<Value, SchemaError> {
        let expr = compile_expr(source).unwrap();
        let mut binder = MapBinder { root: &data };
        evaluate_expr(&expr, source, &mut binder)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("1 + 2 * 3", json!({})).unwrap(), json!(7));
        assert_eq!(run("10 / 4", json!({})).unwrap(), json!(2.5));
        assert_eq!(run("-x", json!({"x": 5})).unwrap(), json!(-5));
    }

    #[test]
    fn test_string_ops() {
        assert_eq!(
            run("globe.toUpperCase()", json!({"globe": "planet earth"})).unwrap(),
            json!("PLANET EARTH")
        );
        assert_eq!(
            run("'a' + 'b' + 1", json!({})).unwrap(),
            json!("ab1")
        );
        assert_eq!(
            run("name.slice(0, 3)", json!({"name": "pardon"})).unwrap(),
            json!("par")
        );
        assert_eq!(
            run("id.padStart(4, '0')", json!({"id": "7"})).unwrap(),
            json!("0007")
        );
        assert_eq!(
            run("csv.split(',')", json!({"csv": "a,b"})).unwrap(),
            json!(["a", "b"])
        );
    }

    #[test]
    fn test_length_property() {
        assert_eq!(run("s.length", json!({"s": "four"})).unwrap(), json!(4));
        assert_eq!(run("a.length", json!({"a": [1, 2]})).unwrap(), json!(2));
    }

    #[test]
    fn test_ternary_and_logic() {
        assert_eq!(
            run("x > 3 ? 'big' : 'small'", json!({"x": 5})).unwrap(),
            json!("big")
        );
        assert_eq!(run("a && b", json!({"a": 1, "b": 2})).unwrap(), json!(2));
        assert_eq!(run("a || b", json!({"a": 0, "b": 2})).unwrap(), json!(2));
    }

    #[test]
    fn test_undefined_ident() {
        match run("missing + 1", json!({})) {
            Err(SchemaError::Undefined { name }) => assert_eq!(name, "missing"),
            other => panic!("expected Undefined, got {other:?}"),
        }
    }

    #[test]
    fn test_dotted_path() {
        assert_eq!(
            run("user.profile.city", json!({"user": {"profile": {"city": "NYC"}}})).unwrap(),
            json!("NYC")
        );
    }
}
