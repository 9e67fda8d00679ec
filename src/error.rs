//! Failure taxonomy for the schema engine.
//!
//! Merge-mode failures are recorded as [`Diagnostic`]s on the walk context and
//! the merge returns a no-schema result; render-mode failures propagate as
//! `Result` errors and interrupt the render, except in the lenient modes
//! (preview / prerender / postrender) where undefined slots degrade to
//! "leave the slot undefined".

use thiserror::Error;

/// Errors produced while parsing or combining `{{...}}` patterns.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PatternError {
    #[error("invalid pattern {source_text:?}: {reason}")]
    InvalidPattern { source_text: String, reason: String },

    #[error("incompatible patterns {left:?} and {right:?}")]
    PatternConflict { left: String, right: String },

    #[error("pattern {pattern:?} does not match {value:?}")]
    PatternMatchFailure { pattern: String, value: String },
}

/// Errors produced while compiling or evaluating embedded expressions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExprError {
    #[error("expression parse error at offset {offset} in {source_text:?}: {reason}")]
    Parse {
        source_text: String,
        offset: usize,
        reason: String,
    },

    #[error("evaluation of {source_text:?} failed: {reason}")]
    Evaluation { source_text: String, reason: String },

    #[error("recursion limit exceeded evaluating {source_text:?}")]
    RecursionLimit { source_text: String },
}

/// The merge/render failure taxonomy of the schema engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Expr(#[from] ExprError),

    /// Template text failed to parse.
    #[error("template parse error at offset {offset}: {reason}")]
    TemplateParse { offset: usize, reason: String },

    /// A template's shape cannot combine with the schema's shape.
    #[error("type mismatch: schema expects {expected}, template holds {found}")]
    TypeMismatch { expected: String, found: String },

    /// No surviving pattern configuration after environment narrowing.
    #[error("no valid configurations for {value:?}")]
    NoValidConfigurations { value: String },

    /// A required pattern never produced a value.
    #[error("unevaluated required pattern {pattern:?}")]
    Unevaluated { pattern: String },

    /// A required identifier had no binding at render time.
    #[error("undefined: {name}")]
    Undefined { name: String },

    /// Match-mode literal disagreed with an already-defined value.
    #[error("mismatch: expected {expected}, found {found}")]
    ExpectedValueMismatch { expected: String, found: String },

    /// A rendered value failed its declared typing or pattern shape.
    #[error("mismatch rendering {value:?}: {reason}")]
    MismatchAtLocation { value: String, reason: String },

    /// A name was declared twice with incompatible expressions.
    #[error("redeclared:{name} :: expression {next:?} conflicts with {prior:?}")]
    RedeclaredIdentifier {
        name: String,
        prior: String,
        next: String,
    },

    /// A name was defined twice with unequal values.
    #[error("redefined:{name}={next} :: previously defined as {prior}")]
    RedefinedIdentifier {
        name: String,
        prior: String,
        next: String,
    },

    /// Rendering a name required its own unresolved value.
    #[error("circular definition of {name}")]
    CircularDefinition { name: String },

    /// A single-valued keyed list observed the same key twice.
    #[error("duplicate key {key:?} in keyed list")]
    DuplicateKey { key: String },

    /// An encoded string failed to decode.
    #[error("{encoding} decode failed: {reason}")]
    DecodeFailure { encoding: String, reason: String },
}

/// A located failure recorded during merge.
///
/// `loc` is `name?:scopes|keys` with scope segments prefixed `:` and key
/// segments prefixed `.`, computed at diagnostic time from the walk context.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub loc: String,
    pub error: SchemaError,
}

impl Diagnostic {
    pub fn new(loc: impl Into<String>, error: SchemaError) -> Self {
        Self {
            loc: loc.into(),
            error,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.loc, self.error)
    }
}

/// Format a diagnostic location from scope path segments and key segments.
pub fn format_loc(name: Option<&str>, scopes: &[String], keys: &[String]) -> String {
    let mut out = String::new();
    if let Some(name) = name {
        out.push_str(name);
    }
    for scope in scopes {
        out.push(':');
        out.push_str(scope);
    }
    out.push('|');
    for key in keys {
        out.push('.');
        out.push_str(key);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_loc() {
        assert_eq!(format_loc(None, &[], &["x".into()]), "|.x");
        assert_eq!(
            format_loc(Some("body"), &["items".into()], &["0".into(), "id".into()]),
            "body:items|.0.id"
        );
    }

    #[test]
    fn test_redefined_message() {
        let err = SchemaError::RedefinedIdentifier {
            name: "x".into(),
            prior: "10".into(),
            next: "30".into(),
        };
        assert_eq!(err.to_string(), "redefined:x=30 :: previously defined as 10");
    }
}
