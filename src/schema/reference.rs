//! Reference schema: a bare identifier at a template position.
//!
//! A reference declares its identifier, binds it to whatever the position
//! resolves to, and renders by looking the identifier up. Chained
//! equalities (`a = b = (10)`) all become the same binding at merge time.

use super::context::{Context, Mode};
use super::{define_checked, merge_node, normalize_param, render_node, resolve_ident, MergeFail, Schema};
use crate::pattern::HintFlags;
use crate::template::Template;
use crate::error::SchemaError;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSchema {
    /// Normalized binding name.
    pub path: String,
    pub hint: HintFlags,
    pub expression: Option<String>,
    pub aliases: Vec<String>,
    /// The shape this position otherwise carries.
    pub inner: Box<Schema>,
}

/// Declare the reference chain: every name in `a = b = expr` shares the
/// expression; a bare `a = b` chain links each name to the next.
fn declare_chain(
    ctx: &mut Context<'_>,
    path: &str,
    hint: HintFlags,
    aliases: &[String],
    expression: Option<&str>,
) -> Result<(), MergeFail> {
    let mut names = vec![normalize_param(path)];
    names.extend(aliases.iter().map(|alias| normalize_param(alias)));

    for (i, name) in names.iter().enumerate() {
        let expr = match expression {
            Some(expr) => Some(expr.to_string()),
            None => names.get(i + 1).map(|next| next.to_string()),
        };
        if let Err(err) = ctx.arena.declare(ctx.scope, name, expr.as_deref(), hint) {
            ctx.diagnose(err);
            return Err(MergeFail);
        }
    }
    Ok(())
}

/// Layer a reference template over an existing schema.
pub(super) fn promote(
    ctx: &mut Context<'_>,
    schema: &Schema,
    path: &str,
    hint: HintFlags,
    aliases: &[String],
    expression: Option<&str>,
) -> Result<Schema, MergeFail> {
    declare_chain(ctx, path, hint, aliases, expression)?;
    let name = normalize_param(path);

    if let Schema::Reference(prior) = schema {
        if prior.path == name {
            let mut merged = prior.clone();
            if merged.expression.is_none() {
                merged.expression = expression.map(str::to_string);
            }
            merged.hint.merge(hint);
            for alias in aliases {
                let alias = normalize_param(alias);
                if !merged.aliases.contains(&alias) {
                    merged.aliases.push(alias);
                }
            }
            return Ok(Schema::Reference(merged));
        }
    }

    Ok(Schema::Reference(ReferenceSchema {
        path: name,
        hint,
        expression: expression.map(str::to_string),
        aliases: aliases.iter().map(|alias| normalize_param(alias)).collect(),
        inner: Box::new(schema.clone()),
    }))
}

pub(super) fn scope(ctx: &mut Context<'_>, reference: &ReferenceSchema) {
    let _ = declare_chain(
        ctx,
        &reference.path,
        reference.hint,
        &reference.aliases,
        reference.expression.as_deref(),
    );
    super::scope_node(ctx, &reference.inner);

    // Match mode resolves eagerly so an expression-backed reference is
    // established before observed literals land on it. A reference with
    // its own merged shape resolves through that shape instead, so its
    // expression must not preempt the position's value; render modes
    // defer entirely to the fixed point.
    if ctx.mode == Mode::Match && matches!(*reference.inner, Schema::Stub) {
        if let Err(err) = resolve_ident(ctx, &reference.path) {
            ctx.diagnose(err);
        }
    }
}

/// Merge a non-reference template into the reference's position.
pub(super) fn merge(
    ctx: &mut Context<'_>,
    reference: &ReferenceSchema,
    template: &Template,
) -> Result<ReferenceSchema, MergeFail> {
    let inner = merge_node(ctx, &reference.inner, template)?;

    // A literal at this position binds the identifier.
    if let Some(value) = template.literal_value() {
        if define_checked(ctx, &reference.path, value).is_err() {
            return Err(MergeFail);
        }
    }

    Ok(ReferenceSchema {
        inner: Box::new(inner),
        ..reference.clone()
    })
}

pub(super) fn render(
    ctx: &mut Context<'_>,
    reference: &ReferenceSchema,
) -> Result<Option<Value>, SchemaError> {
    if let Some(def) = ctx.arena.lookup_value(ctx.scope, &reference.path) {
        return Ok(Some(def.value.clone()));
    }

    // The position's own merged shape binds the identifier; the declared
    // expression and the environment are fallbacks, in that order.
    if !matches!(*reference.inner, Schema::Stub) {
        if let Some(value) = render_node(ctx, &reference.inner)? {
            define_checked(ctx, &reference.path, value.clone())?;
            return Ok(Some(value));
        }
    }

    if let Some(value) = resolve_ident(ctx, &reference.path)? {
        return Ok(Some(value));
    }

    if !ctx.finalizing {
        return Ok(None);
    }
    match ctx.mode {
        Mode::Preview => Ok(Some(Value::String(format!("{{{{{}}}}}", reference.path)))),
        mode if mode.is_lenient() => Ok(None),
        _ => {
            if reference.hint.optional {
                Ok(None)
            } else {
                Err(SchemaError::Undefined {
                    name: reference.path.clone(),
                })
            }
        }
    }
}
