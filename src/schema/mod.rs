//! Schema primitives: the tagged node kinds and their capability set.
//!
//! A schema is an immutable, composable description of a value's shape.
//! Every kind implements the same capabilities, dispatched by match:
//!
//! - `scope_node`   - declare the names a node can bind
//! - `merge_node`   - combine with a template, or fail with diagnostics
//! - `render_node`  - produce a concrete value (or report the slot pending)
//!
//! Rendering runs as a fixed point: the driver repeats passes while
//! bindings make progress; a pass that resolves nothing while slots remain
//! pending is a stall, finalized leniently or strictly by mode.

pub mod context;

mod array;
mod encode;
mod object;
mod reference;
mod scalar;

pub use array::{ArrayElement, ArraySchema};
pub use context::{Context, Mode, Phase};
pub use encode::EncodingSchema;
pub use object::{ObjectEntrySchema, ObjectSchema};
pub use reference::ReferenceSchema;
pub use scalar::ScalarSchema;

use crate::error::SchemaError;
use crate::expr::{compile_expr, evaluate_expr, Binder};
use crate::pattern::Pattern;
use crate::template::Template;
use crate::values::scalar_string;
use indexmap::IndexMap;
use serde_json::Value;

/// A compiled, composable description of how to match and render a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// The empty schema: matches anything, renders as undefined.
    Stub,
    Scalar(ScalarSchema),
    Object(ObjectSchema),
    Array(ArraySchema),
    Encoding(EncodingSchema),
    Reference(ReferenceSchema),
    /// Rendered for side-effects; output discarded.
    Hidden(Box<Schema>),
}

impl Schema {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Schema::Stub => "stub",
            Schema::Scalar(_) => "scalar",
            Schema::Object(_) => "object",
            Schema::Array(_) => "array",
            Schema::Encoding(_) => "encoding",
            Schema::Reference(_) => "reference",
            Schema::Hidden(_) => "hidden",
        }
    }
}

/// Marker for a failed merge; the diagnostics live on the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeFail;

pub type MergeResult = Result<Schema, MergeFail>;

/// Declare the names a schema can bind, creating subscopes as needed.
///
/// Outside merge mode this pass also resolves scalars and references for
/// side-effects, so already-known patterns populate the scope up front.
pub fn scope_node(ctx: &mut Context<'_>, schema: &Schema) {
    match schema {
        Schema::Stub => {}
        Schema::Scalar(scalar) => scalar::scope(ctx, scalar),
        Schema::Object(object) => object::scope(ctx, object),
        Schema::Array(array) => array::scope(ctx, array),
        Schema::Encoding(encoding) => scope_node(ctx, &encoding.inner),
        Schema::Reference(reference) => reference::scope(ctx, reference),
        Schema::Hidden(inner) => scope_node(ctx, inner),
    }
}

/// Combine a schema with a template, producing the merged schema.
pub fn merge_node(ctx: &mut Context<'_>, schema: &Schema, template: &Template) -> MergeResult {
    // Hidden wraps either side transparently.
    if let Template::Hidden(inner) = template {
        let unwrapped = match schema {
            Schema::Hidden(prior) => prior.as_ref(),
            other => other,
        };
        let merged = merge_node(ctx, unwrapped, inner)?;
        return Ok(Schema::Hidden(Box::new(merged)));
    }
    if let Schema::Hidden(inner) = schema {
        let merged = merge_node(ctx, inner, template)?;
        return Ok(Schema::Hidden(Box::new(merged)));
    }

    // A bare reference layers over any existing shape.
    if let Template::Reference {
        path,
        hint,
        aliases,
        expression,
    } = template
    {
        return reference::promote(ctx, schema, path, *hint, aliases, expression.as_deref());
    }

    match schema {
        Schema::Stub => match template {
            Template::Null | Template::Bool(_) | Template::Number(_) | Template::Text(_) => {
                scalar::merge(ctx, &ScalarSchema::default(), template).map(Schema::Scalar)
            }
            Template::Object { .. } => {
                object::merge(ctx, &ObjectSchema::default(), template).map(Schema::Object)
            }
            Template::Tuple(_) | Template::Spread(_) | Template::Keyed { .. } => {
                array::merge_fresh(ctx, template).map(Schema::Array)
            }
            Template::Encoded { encoding, inner } => {
                let fresh = EncodingSchema {
                    encoding: *encoding,
                    inner: Box::new(Schema::Stub),
                };
                encode::merge(ctx, &fresh, inner).map(Schema::Encoding)
            }
            Template::Reference { .. } | Template::Hidden(_) => unreachable!("handled above"),
        },
        Schema::Scalar(scalar) => scalar::merge(ctx, scalar, template).map(Schema::Scalar),
        Schema::Object(object) => object::merge(ctx, object, template).map(Schema::Object),
        Schema::Array(array) => array::merge(ctx, array, template).map(Schema::Array),
        Schema::Encoding(encoding) => match template {
            Template::Encoded {
                encoding: tmpl_encoding,
                inner,
            } if *tmpl_encoding == encoding.encoding => {
                encode::merge(ctx, encoding, inner).map(Schema::Encoding)
            }
            other => encode::merge_encoded(ctx, encoding, other).map(Schema::Encoding),
        },
        Schema::Reference(reference) => {
            reference::merge(ctx, reference, template).map(Schema::Reference)
        }
        Schema::Hidden(_) => unreachable!("handled above"),
    }
}

/// Render a schema to a concrete value.
///
/// `Ok(None)` marks the slot pending (retried by the fixed point) or, in a
/// finalizing pass, omitted.
pub fn render_node(ctx: &mut Context<'_>, schema: &Schema) -> Result<Option<Value>, SchemaError> {
    match schema {
        Schema::Stub => Ok(None),
        Schema::Scalar(scalar) => scalar::render(ctx, scalar),
        Schema::Object(object) => object::render(ctx, object),
        Schema::Array(array) => array::render(ctx, array),
        Schema::Encoding(encoding) => encode::render(ctx, encoding),
        Schema::Reference(reference) => reference::render(ctx, reference),
        Schema::Hidden(inner) => {
            render_node(ctx, inner)?;
            Ok(None)
        }
    }
}

/// Collect the parameter names still unresolved under a schema, for stall
/// reporting. Hidden subtrees are skipped: their bindings are only needed
/// if something else references them.
pub fn collect_unresolved(ctx: &Context<'_>, schema: &Schema, out: &mut Vec<String>) {
    match schema {
        Schema::Stub | Schema::Hidden(_) => {}
        Schema::Scalar(scalar) => scalar::collect_unresolved(ctx, scalar, out),
        Schema::Object(object) => {
            for entry in object.entries.values() {
                collect_unresolved(ctx, &entry.schema, out);
            }
        }
        Schema::Array(array) => array.collect_unresolved(ctx, out),
        Schema::Encoding(encoding) => collect_unresolved(ctx, &encoding.inner, out),
        Schema::Reference(reference) => {
            if ctx.arena.lookup_value(ctx.scope, &reference.path).is_none() {
                out.push(reference.path.clone());
            }
            collect_unresolved(ctx, &reference.inner, out);
        }
    }
}

/// Normalize a pattern parameter to its binding name:
/// `map.$key` -> `map.@key`, `map.$value` -> `map.@value`.
pub(crate) fn normalize_param(param: &str) -> String {
    param
        .split('.')
        .map(|segment| match segment {
            "$key" => "@key",
            "$value" => "@value",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Binder that resolves identifiers through the walk context, triggering
/// lazy evaluation of declared expressions.
pub(crate) struct EngineBinder<'a, 'e> {
    pub ctx: &'a mut Context<'e>,
}

impl Binder for EngineBinder<'_, '_> {
    fn lookup(&mut self, path: &str) -> Result<Option<Value>, SchemaError> {
        resolve_ident(self.ctx, &normalize_param(path))
    }
}

/// Resolve an identifier: scope binding first, then a declared expression
/// (cycle-guarded), then the environment. Resolved values are defined into
/// the scope so later lookups are direct.
pub(crate) fn resolve_ident(
    ctx: &mut Context<'_>,
    name: &str,
) -> Result<Option<Value>, SchemaError> {
    if let Some(def) = ctx.arena.lookup_value(ctx.scope, name) {
        return Ok(Some(def.value.clone()));
    }

    let expression = ctx
        .arena
        .lookup_declaration(ctx.scope, name)
        .and_then(|(_, decl)| decl.expression.clone());

    if let Some(source) = expression {
        if let Some(value) = ctx.environment.evaluating(name, &source) {
            define_checked(ctx, name, value.clone())?;
            return Ok(Some(value));
        }

        match ctx.arena.begin_rendering(ctx.scope, name) {
            Ok(()) => {}
            Err(err) => {
                if ctx.mode.is_lenient() {
                    return Ok(None);
                }
                return Err(err);
            }
        }
        let outcome = evaluate_source(ctx, &source);
        ctx.arena.end_rendering(ctx.scope, name);
        match outcome {
            Ok(Some(value)) => {
                define_checked(ctx, name, value.clone())?;
                return Ok(Some(value));
            }
            Ok(None) => {}
            Err(err) => return Err(err),
        }
    }

    // Aggregates reconstruct from their subscopes rather than binding.
    if let Some((decl_scope, aggregate)) = ctx
        .arena
        .lookup_declaration(ctx.scope, name)
        .and_then(|(id, decl)| decl.aggregate.map(|a| (id, a)))
    {
        if let Some(value) = ctx.arena.aggregate_value(decl_scope, name, aggregate) {
            return Ok(Some(value));
        }
    }

    if let Some(value) = ctx.environment.resolve(name) {
        define_checked(ctx, name, value.clone())?;
        return Ok(Some(value));
    }
    Ok(None)
}

/// Compile and evaluate an expression source. `Ok(None)` means an
/// identifier it awaits is still unresolved.
pub(crate) fn evaluate_source(
    ctx: &mut Context<'_>,
    source: &str,
) -> Result<Option<Value>, SchemaError> {
    let compiled = match compile_expr(source) {
        Ok(compiled) => compiled,
        Err(err) => return Err(err.into()),
    };
    let mut binder = EngineBinder { ctx };
    match evaluate_expr(&compiled, source, &mut binder) {
        Ok(value) => Ok(Some(value)),
        Err(SchemaError::Undefined { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Install a binding, mapping conflicts onto the mode's policy: a
/// diagnostic plus override while merging, a hard error under render.
pub(crate) fn define_checked(
    ctx: &mut Context<'_>,
    name: &str,
    value: Value,
) -> Result<(), SchemaError> {
    use crate::scope::Defined;

    match ctx.arena.define(ctx.scope, name, value.clone()) {
        Defined::New | Defined::Matched => Ok(()),
        Defined::Conflict { prior } => {
            let err = SchemaError::RedefinedIdentifier {
                name: name.to_string(),
                prior: display_value(&prior),
                next: display_value(&value),
            };
            if ctx.mode.is_merging() {
                // The later literal wins; the disagreement is recorded.
                ctx.diagnose(err);
                ctx.arena.redefine(ctx.scope, name, value);
                Ok(())
            } else {
                Err(err)
            }
        }
    }
}

fn display_value(value: &Value) -> String {
    scalar_string(value).unwrap_or_else(|| value.to_string())
}

/// Known parameter projections for pattern narrowing: scope bindings plus
/// environment values, keyed by the raw parameter spelling.
pub(crate) fn known_param_values(
    ctx: &mut Context<'_>,
    patterns: &[Pattern],
) -> IndexMap<String, String> {
    let mut known = IndexMap::new();
    for pattern in patterns {
        for var in &pattern.vars {
            if var.param.is_empty() || known.contains_key(&var.param) {
                continue;
            }
            let name = normalize_param(&var.param);
            let value = ctx
                .arena
                .lookup_value(ctx.scope, &name)
                .map(|def| def.value.clone())
                .or_else(|| ctx.environment.resolve(&name));
            if let Some(value) = value {
                if let Some(text) = scalar_string(&value) {
                    known.insert(var.param.clone(), text);
                }
            }
        }
    }
    known
}

/// The aggregation root referenced by a template, if any: the first dotted
/// parameter or reference whose root is not positionally scoped.
pub(crate) fn find_aggregate_name(template: &Template) -> Option<String> {
    match template {
        Template::Text(text) => {
            let pattern = Pattern::parse(text).ok()?;
            pattern
                .vars
                .iter()
                .filter(|var| var.param.contains('.'))
                .map(|var| crate::path_utils::root_segment(&var.param).to_string())
                .next()
        }
        Template::Reference { path, .. } => {
            if path.contains('.') {
                Some(crate::path_utils::root_segment(path).to_string())
            } else {
                None
            }
        }
        Template::Object { entries, spreads } => entries
            .iter()
            .filter_map(|entry| find_aggregate_name(&entry.template))
            .next()
            .or_else(|| spreads.iter().filter_map(find_aggregate_name).next()),
        Template::Tuple(items) => items.iter().filter_map(find_aggregate_name).next(),
        Template::Spread(inner)
        | Template::Hidden(inner)
        | Template::Keyed {
            archetype: inner, ..
        } => find_aggregate_name(inner),
        Template::Encoded { inner, .. } => find_aggregate_name(inner),
        _ => None,
    }
}
