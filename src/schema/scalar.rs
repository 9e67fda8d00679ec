//! Scalar schema: a set of merged patterns plus an optional typed
//! conversion.
//!
//! A scalar retains every pattern merged into it; the patterns must stay
//! mutually consistent under the current bindings. Resolving a scalar
//! through any one pattern pushes the captures of every other pattern into
//! the scope, which is how values propagate across pattern boundaries.

use super::context::{Context, Mode, Phase};
use super::{
    define_checked, evaluate_source, known_param_values, normalize_param, resolve_ident, MergeFail,
};
use crate::error::{PatternError, SchemaError};
use crate::pattern::{pattern_match, pattern_render, patterns_match, Pattern, PatternKind};
use crate::template::Template;
use crate::expr::stringify;
use crate::values::{convert_scalar, retype_captured, ScalarKind};
use serde_json::Value;

/// A scalar slot: merged patterns plus the declared conversion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalarSchema {
    pub patterns: Vec<Pattern>,
    pub kind: Option<ScalarKind>,
}

impl ScalarSchema {
    /// Build a scalar holding a single parsed pattern.
    pub fn of_pattern(pattern: Pattern, kind: Option<ScalarKind>) -> Self {
        Self {
            patterns: vec![pattern],
            kind,
        }
    }
}

/// Declare every pattern parameter; outside merge mode, also resolve for
/// side-effects so known patterns populate the scope up front.
pub(super) fn scope(ctx: &mut Context<'_>, scalar: &ScalarSchema) {
    for pattern in &scalar.patterns {
        declare_pattern_vars(ctx, pattern);
    }
    // Match mode resolves eagerly so already-known patterns populate the
    // scope before the observed value lands. Render modes leave resolution
    // to the fixed point, where positional values take precedence over
    // declared expressions.
    if ctx.mode == Mode::Match {
        if let Err(err) = try_resolve(ctx, scalar) {
            ctx.diagnose(err);
        }
    }
}

pub(super) fn declare_pattern_vars(ctx: &mut Context<'_>, pattern: &Pattern) {
    for var in &pattern.vars {
        if var.param.is_empty() {
            continue;
        }
        let name = normalize_param(&var.param);
        if let Err(err) = ctx
            .arena
            .declare(ctx.scope, &name, var.expr.as_deref(), var.hint)
        {
            ctx.diagnose(err);
        }
    }
}

/// Merge a scalar-shaped template into the scalar.
pub(super) fn merge(
    ctx: &mut Context<'_>,
    scalar: &ScalarSchema,
    template: &Template,
) -> Result<ScalarSchema, MergeFail> {
    let mut out = scalar.clone();

    // 1. Extract the template's representation.
    let (source_text, kind) = match template {
        Template::Text(text) => (text.clone(), None),
        Template::Number(text) => (text.clone(), Some(ScalarKind::Number)),
        Template::Bool(b) => (b.to_string(), Some(ScalarKind::Boolean)),
        Template::Null => ("null".to_string(), Some(ScalarKind::Null)),
        other => {
            ctx.diagnose(SchemaError::TypeMismatch {
                expected: "scalar".to_string(),
                found: other.shape_name().to_string(),
            });
            return Err(MergeFail);
        }
    };
    if out.kind.is_none() {
        out.kind = kind;
    }

    let pattern = match Pattern::parse(&source_text) {
        Ok(pattern) => pattern,
        Err(err) => {
            ctx.diagnose(err.into());
            return Err(MergeFail);
        }
    };

    // Two unequal literals can never describe the same slot.
    if pattern.is_literal() {
        if let Some(existing) = out
            .patterns
            .iter()
            .find(|p| p.is_literal() && p.source != pattern.source)
        {
            ctx.diagnose(SchemaError::ExpectedValueMismatch {
                expected: existing.source.clone(),
                found: pattern.source.clone(),
            });
            return Err(MergeFail);
        }
    }

    // 2. Combine patterns.
    declare_pattern_vars(ctx, &pattern);
    if let Some(existing) = out.patterns.iter_mut().find(|p| p.equivalent(&pattern)) {
        for (slot, var) in existing.vars.iter_mut().zip(pattern.vars.iter()) {
            slot.hint.merge(var.hint);
        }
    } else {
        for existing in &out.patterns {
            if !patterns_match(existing, &pattern) {
                ctx.diagnose(
                    PatternError::PatternConflict {
                        left: existing.source.clone(),
                        right: pattern.source.clone(),
                    }
                    .into(),
                );
                return Err(MergeFail);
            }
        }
        // Melding layers must not broaden an already-narrowed slot: a bare
        // variable adds nothing after a shaped pattern exists.
        let skip = ctx.mode == Mode::Merge
            && pattern.is_trivial()
            && out.patterns.iter().any(|p| !p.is_trivial());
        if !skip {
            if pattern.is_literal() {
                out.patterns.insert(0, pattern);
            } else {
                out.patterns.push(pattern);
            }
        }
    }

    // 3. Environment narrowing over the candidate set.
    let known = known_param_values(ctx, &out.patterns);
    match ctx.environment.match_patterns(&out.patterns, &known) {
        Some(narrowed) => out.patterns = narrowed,
        None => {
            ctx.diagnose(SchemaError::NoValidConfigurations { value: source_text });
            return Err(MergeFail);
        }
    }

    // 4-6. Opportunistic resolution; captures flow into the scope.
    if let Err(err) = try_resolve(ctx, &out) {
        ctx.diagnose(err);
        return Err(MergeFail);
    }

    // 7. Validation: a required slot must have produced a value by now.
    if ctx.phase == Phase::Validate {
        let resolved = out
            .patterns
            .iter()
            .flat_map(|p| p.params())
            .all(|param| has_binding(ctx, param));
        if !resolved && out.patterns.iter().any(Pattern::any_required) {
            let pattern = out
                .patterns
                .iter()
                .find(|p| p.any_required())
                .map(|p| p.source.clone())
                .unwrap_or_default();
            ctx.diagnose(SchemaError::Unevaluated { pattern });
            return Err(MergeFail);
        }
    }

    Ok(out)
}

fn has_binding(ctx: &Context<'_>, param: &str) -> bool {
    ctx.arena
        .lookup_value(ctx.scope, &normalize_param(param))
        .is_some()
}

/// Resolve the scalar's text if any pattern is fully evaluable, then push
/// every pattern's captures into the scope.
pub(super) fn try_resolve(
    ctx: &mut Context<'_>,
    scalar: &ScalarSchema,
) -> Result<Option<String>, SchemaError> {
    let text = resolve_text(ctx, scalar)?;
    if let Some(text) = &text {
        define_matches(ctx, scalar, text)?;
    }
    Ok(text)
}

/// Find the first pattern whose parameters all resolve, in resolution
/// priority: literals, then shaped patterns, then expressive ones.
fn resolve_text(
    ctx: &mut Context<'_>,
    scalar: &ScalarSchema,
) -> Result<Option<String>, SchemaError> {
    let mut ordered: Vec<&Pattern> = scalar.patterns.iter().collect();
    ordered.sort_by_key(|p| match p.kind() {
        PatternKind::Literal => 0,
        PatternKind::Trivial | PatternKind::Simple | PatternKind::Regex => 1,
        PatternKind::Expressive => 2,
    });

    'pattern: for pattern in ordered {
        if pattern.is_literal() {
            return Ok(Some(pattern.source.clone()));
        }
        let mut args = Vec::with_capacity(pattern.vars.len());
        for var in &pattern.vars {
            let value = if var.param.is_empty() {
                let Some(source) = var.expr.as_deref() else {
                    continue 'pattern;
                };
                match evaluate_source(ctx, source)? {
                    Some(value) => value,
                    None => continue 'pattern,
                }
            } else {
                match resolve_ident(ctx, &normalize_param(&var.param))? {
                    Some(value) => value,
                    None => continue 'pattern,
                }
            };
            args.push(stringify(&value));
        }
        return Ok(Some(pattern_render(pattern, &args)));
    }
    Ok(None)
}

/// Match the resolved text against every pattern, defining the captures.
/// A pattern that cannot match the established value is a mismatch.
fn define_matches(
    ctx: &mut Context<'_>,
    scalar: &ScalarSchema,
    text: &str,
) -> Result<(), SchemaError> {
    for pattern in &scalar.patterns {
        match pattern_match(pattern, text) {
            Some(captures) => {
                for (param, captured) in captures {
                    let name = normalize_param(&param);
                    let value = if pattern.is_trivial() {
                        retype_captured(&captured, scalar.kind)
                    } else {
                        Value::String(captured)
                    };
                    define_checked(ctx, &name, value)?;
                }
            }
            None => {
                return Err(PatternError::PatternMatchFailure {
                    pattern: pattern.source.clone(),
                    value: text.to_string(),
                }
                .into());
            }
        }
    }
    Ok(())
}

/// Render the scalar to its typed value.
pub(super) fn render(
    ctx: &mut Context<'_>,
    scalar: &ScalarSchema,
) -> Result<Option<Value>, SchemaError> {
    // 1. Reconfigure patterns under render.
    let known = known_param_values(ctx, &scalar.patterns);
    let patterns = match ctx
        .environment
        .reconfigure_patterns(&scalar.patterns, &known)
    {
        Some(patterns) => patterns,
        None => {
            if ctx.mode.is_lenient() {
                return Ok(None);
            }
            return Err(SchemaError::NoValidConfigurations {
                value: scalar
                    .patterns
                    .first()
                    .map(|p| p.source.clone())
                    .unwrap_or_default(),
            });
        }
    };
    let view = ScalarSchema {
        patterns,
        kind: scalar.kind,
    };

    match try_resolve(ctx, &view)? {
        Some(text) => {
            let value = match view.kind {
                Some(kind) => convert_scalar(&text, kind).ok_or_else(|| {
                    SchemaError::MismatchAtLocation {
                        value: text.clone(),
                        reason: format!("not a {}", kind.name()),
                    }
                })?,
                None => Value::String(text),
            };

            // 6. Redaction for secret slots when the render is non-secret.
            if !ctx.environment.options().secrets {
                if let Some(secret) = view.patterns.iter().find(|p| p.is_secret()) {
                    return Ok(Some(ctx.environment.redact(&value, &secret.source)));
                }
            }
            Ok(Some(value))
        }
        None => {
            if !ctx.finalizing {
                return Ok(None);
            }
            match ctx.mode {
                Mode::Preview => Ok(Some(Value::String(
                    view.patterns
                        .first()
                        .map(|p| p.source.clone())
                        .unwrap_or_default(),
                ))),
                mode if mode.is_lenient() => Ok(None),
                _ => {
                    if view.patterns.iter().all(Pattern::all_optional) && !view.patterns.is_empty()
                    {
                        return Ok(None);
                    }
                    let name = first_unresolved(ctx, &view)
                        .unwrap_or_else(|| "<anonymous>".to_string());
                    Err(SchemaError::Undefined { name })
                }
            }
        }
    }
}

fn first_unresolved(ctx: &Context<'_>, scalar: &ScalarSchema) -> Option<String> {
    scalar
        .patterns
        .iter()
        .flat_map(|p| p.params())
        .map(normalize_param)
        .find(|name| ctx.arena.lookup_value(ctx.scope, name).is_none())
}

pub(super) fn collect_unresolved(ctx: &Context<'_>, scalar: &ScalarSchema, out: &mut Vec<String>) {
    for pattern in &scalar.patterns {
        for param in pattern.params() {
            let name = normalize_param(param);
            if ctx.arena.lookup_value(ctx.scope, &name).is_none() && !out.contains(&name) {
                out.push(name);
            }
        }
    }
}
