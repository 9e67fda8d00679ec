//! Array-like schemas: fixed tuples, archetype spreads, and keyed lists.
//!
//! A spread `[...archetype]` applies one subtemplate to every element;
//! each element gets an indexed subscope. A keyed list `{keyTmpl} * [...]`
//! is a single-valued map keyed by the key template evaluated on each
//! element (`**` appends duplicates instead of failing). The map or list
//! reconstructed from the element subscopes must be exactly what export
//! aggregation rebuilds.

use super::context::{Context, Mode};
use super::{
    define_checked, find_aggregate_name, merge_node, render_node, resolve_ident, MergeFail, Schema,
};
use crate::error::SchemaError;
use crate::pattern::Pattern;
use crate::scope::{AggregateType, ScopeIndex, ScopeIndexType};
use crate::template::Template;
use serde_json::Value;

/// One matched (or expanded) element of a spread / keyed list.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayElement {
    /// Subscope name under the containing scope.
    pub scope_name: String,
    /// Keyed-list key, when known.
    pub key: Option<String>,
    pub schema: Schema,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArraySchema {
    /// Fixed length, positional merge.
    Tuple(Vec<Schema>),
    /// `[...archetype]` over every element.
    Spread {
        archetypes: Vec<Template>,
        elements: Vec<ArrayElement>,
        aggregate: Option<String>,
    },
    /// `{keyTmpl} * [...archetype]` / `**`.
    Keyed {
        key: Template,
        multi: bool,
        archetypes: Vec<Template>,
        elements: Vec<ArrayElement>,
        aggregate: Option<String>,
    },
}

fn element_index(key: &str) -> ScopeIndex {
    ScopeIndex {
        index_type: ScopeIndexType::Element,
        key: Some(key.to_string()),
    }
}

pub(super) fn scope(ctx: &mut Context<'_>, array: &ArraySchema) {
    match array {
        ArraySchema::Tuple(schemas) => {
            for (i, schema) in schemas.iter().enumerate() {
                let name = i.to_string();
                let frame = ctx.enter_subscope(&name, element_index(&name));
                super::scope_node(ctx, schema);
                ctx.restore(frame);
            }
        }
        ArraySchema::Spread {
            elements,
            aggregate,
            ..
        } => {
            declare_aggregate(ctx, aggregate, AggregateType::List);
            scope_elements(ctx, elements);
        }
        ArraySchema::Keyed {
            multi,
            elements,
            aggregate,
            ..
        } => {
            let kind = if *multi {
                AggregateType::MultiKeyed
            } else {
                AggregateType::Keyed
            };
            declare_aggregate(ctx, aggregate, kind);
            scope_elements(ctx, elements);
        }
    }
}

fn scope_elements(ctx: &mut Context<'_>, elements: &[ArrayElement]) {
    for element in elements {
        let index = ScopeIndex {
            index_type: ScopeIndexType::Element,
            key: element
                .key
                .clone()
                .or_else(|| Some(element.scope_name.clone())),
        };
        let frame = ctx.enter_subscope(&element.scope_name, index);
        super::scope_node(ctx, &element.schema);
        ctx.restore(frame);
    }
}

fn declare_aggregate(ctx: &mut Context<'_>, aggregate: &Option<String>, kind: AggregateType) {
    if let Some(name) = aggregate {
        if let Err(err) = ctx.arena.declare_aggregate(ctx.scope, name, kind) {
            ctx.diagnose(err);
        }
    }
}

/// Build an array schema from an array-shaped template over a stub.
pub(super) fn merge_fresh(ctx: &mut Context<'_>, template: &Template) -> Result<ArraySchema, MergeFail> {
    match template {
        Template::Tuple(items) => {
            let mut schemas = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let name = i.to_string();
                let frame = ctx.enter_subscope(&name, element_index(&name));
                let merged = merge_node(ctx, &Schema::Stub, item);
                ctx.restore(frame);
                schemas.push(merged?);
            }
            Ok(ArraySchema::Tuple(schemas))
        }
        Template::Spread(archetype) => {
            let aggregate = find_aggregate_name(archetype);
            declare_aggregate(ctx, &aggregate, AggregateType::List);
            Ok(ArraySchema::Spread {
                archetypes: vec![archetype.as_ref().clone()],
                elements: Vec::new(),
                aggregate,
            })
        }
        Template::Keyed {
            key,
            multi,
            archetype,
        } => {
            let aggregate = find_aggregate_name(archetype);
            let kind = if *multi {
                AggregateType::MultiKeyed
            } else {
                AggregateType::Keyed
            };
            declare_aggregate(ctx, &aggregate, kind);
            Ok(ArraySchema::Keyed {
                key: key.as_ref().clone(),
                multi: *multi,
                archetypes: vec![archetype.as_ref().clone()],
                elements: Vec::new(),
                aggregate,
            })
        }
        other => {
            ctx.diagnose(SchemaError::TypeMismatch {
                expected: "array".to_string(),
                found: other.shape_name().to_string(),
            });
            Err(MergeFail)
        }
    }
}

pub(super) fn merge(
    ctx: &mut Context<'_>,
    array: &ArraySchema,
    template: &Template,
) -> Result<ArraySchema, MergeFail> {
    match (array, template) {
        (ArraySchema::Tuple(schemas), Template::Tuple(items)) => {
            if ctx.mode == Mode::Match && schemas.len() != items.len() {
                ctx.diagnose(SchemaError::TypeMismatch {
                    expected: format!("array of {}", schemas.len()),
                    found: format!("array of {}", items.len()),
                });
                return Err(MergeFail);
            }
            let len = schemas.len().max(items.len());
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                let prior = schemas.get(i).cloned().unwrap_or(Schema::Stub);
                let merged = match items.get(i) {
                    Some(item) => {
                        let name = i.to_string();
                        let frame = ctx.enter_subscope(&name, element_index(&name));
                        let merged = merge_node(ctx, &prior, item);
                        ctx.restore(frame);
                        merged?
                    }
                    None => prior,
                };
                out.push(merged);
            }
            Ok(ArraySchema::Tuple(out))
        }
        (ArraySchema::Tuple(schemas), Template::Spread(archetype)) => {
            // Layering an archetype over concrete positions.
            let mut elements = Vec::with_capacity(schemas.len());
            for (i, prior) in schemas.iter().enumerate() {
                let name = i.to_string();
                let frame = ctx.enter_subscope(&name, element_index(&name));
                let merged = merge_node(ctx, prior, archetype);
                ctx.restore(frame);
                elements.push(ArrayElement {
                    scope_name: name,
                    key: None,
                    schema: merged?,
                });
            }
            let aggregate = find_aggregate_name(archetype);
            declare_aggregate(ctx, &aggregate, AggregateType::List);
            Ok(ArraySchema::Spread {
                archetypes: vec![archetype.as_ref().clone()],
                elements,
                aggregate,
            })
        }
        (
            ArraySchema::Spread {
                archetypes,
                elements,
                aggregate,
            },
            Template::Tuple(items),
        ) => {
            let mut out = elements.clone();
            for (i, item) in items.iter().enumerate() {
                let name = i.to_string();
                let prior = out
                    .iter()
                    .find(|e| e.scope_name == name)
                    .map(|e| e.schema.clone())
                    .unwrap_or(Schema::Stub);
                let frame = ctx.enter_subscope(&name, element_index(&name));
                let merged = merge_element(ctx, prior, None, archetypes, item);
                ctx.restore(frame);
                let merged = merged?;
                out.retain(|e| e.scope_name != name);
                out.push(ArrayElement {
                    scope_name: name,
                    key: None,
                    schema: merged,
                });
            }
            Ok(ArraySchema::Spread {
                archetypes: archetypes.clone(),
                elements: out,
                aggregate: aggregate.clone(),
            })
        }
        (
            ArraySchema::Spread {
                archetypes,
                elements,
                aggregate,
            },
            Template::Spread(next),
        ) => {
            let mut archetypes = archetypes.clone();
            archetypes.push(next.as_ref().clone());
            let mut out = Vec::with_capacity(elements.len());
            for element in elements {
                let frame = ctx.enter_subscope(
                    &element.scope_name,
                    element_index(element.key.as_deref().unwrap_or(&element.scope_name)),
                );
                let merged = merge_node(ctx, &element.schema, next);
                ctx.restore(frame);
                out.push(ArrayElement {
                    schema: merged?,
                    ..element.clone()
                });
            }
            let aggregate = aggregate.clone().or_else(|| find_aggregate_name(next));
            declare_aggregate(ctx, &aggregate, AggregateType::List);
            Ok(ArraySchema::Spread {
                archetypes,
                elements: out,
                aggregate,
            })
        }
        (
            ArraySchema::Spread {
                archetypes,
                elements,
                aggregate,
            },
            Template::Keyed {
                key,
                multi,
                archetype,
            },
        ) => {
            // A keyed layer upgrades the spread.
            let mut archetypes = archetypes.clone();
            archetypes.push(archetype.as_ref().clone());
            let aggregate = aggregate
                .clone()
                .or_else(|| find_aggregate_name(archetype));
            let kind = if *multi {
                AggregateType::MultiKeyed
            } else {
                AggregateType::Keyed
            };
            declare_aggregate(ctx, &aggregate, kind);
            Ok(ArraySchema::Keyed {
                key: key.as_ref().clone(),
                multi: *multi,
                archetypes,
                elements: elements.clone(),
                aggregate,
            })
        }
        (
            ArraySchema::Keyed {
                key,
                multi,
                archetypes,
                elements,
                aggregate,
            },
            Template::Tuple(items),
        ) => {
            let mut out = elements.clone();
            let mut seen: Vec<String> = Vec::new();
            for item in items {
                let Some(item_key) = probe_key(key, item) else {
                    ctx.diagnose(SchemaError::TypeMismatch {
                        expected: "keyed element".to_string(),
                        found: item.shape_name().to_string(),
                    });
                    return Err(MergeFail);
                };
                if !*multi && seen.contains(&item_key) {
                    ctx.diagnose(SchemaError::DuplicateKey {
                        key: item_key.clone(),
                    });
                    return Err(MergeFail);
                }
                let scope_name = if *multi {
                    let n = seen.iter().filter(|k| **k == item_key).count();
                    format!("{item_key}#{n}")
                } else {
                    item_key.clone()
                };
                seen.push(item_key.clone());

                let prior = out
                    .iter()
                    .find(|e| e.scope_name == scope_name)
                    .map(|e| e.schema.clone())
                    .unwrap_or(Schema::Stub);
                let frame = ctx.enter_subscope(&scope_name, element_index(&item_key));
                let merged = merge_element(ctx, prior, Some(key), archetypes, item);
                ctx.restore(frame);
                let merged = merged?;
                out.retain(|e| e.scope_name != scope_name);
                out.push(ArrayElement {
                    scope_name,
                    key: Some(item_key),
                    schema: merged,
                });
            }
            Ok(ArraySchema::Keyed {
                key: key.clone(),
                multi: *multi,
                archetypes: archetypes.clone(),
                elements: out,
                aggregate: aggregate.clone(),
            })
        }
        (
            ArraySchema::Keyed {
                key,
                multi,
                archetypes,
                elements,
                aggregate,
            },
            Template::Spread(next) | Template::Keyed {
                archetype: next, ..
            },
        ) => {
            let mut archetypes = archetypes.clone();
            archetypes.push(next.as_ref().clone());
            Ok(ArraySchema::Keyed {
                key: key.clone(),
                multi: *multi,
                archetypes,
                elements: elements.clone(),
                aggregate: aggregate.clone(),
            })
        }
        (_, other) => {
            ctx.diagnose(SchemaError::TypeMismatch {
                expected: "array".to_string(),
                found: other.shape_name().to_string(),
            });
            Err(MergeFail)
        }
    }
}

/// Merge the key template (keyed lists), every archetype, and the observed
/// item into one element schema, inside the element's subscope.
fn merge_element(
    ctx: &mut Context<'_>,
    prior: Schema,
    key_template: Option<&Template>,
    archetypes: &[Template],
    item: &Template,
) -> Result<Schema, MergeFail> {
    let mut schema = prior;
    if let Some(key_template) = key_template {
        schema = merge_node(ctx, &schema, key_template)?;
    }
    for archetype in archetypes {
        schema = merge_node(ctx, &schema, archetype)?;
    }
    merge_node(ctx, &schema, item)
}

/// Evaluate the key template against an observed element at the template
/// level: follow the key template's structure to its first reference and
/// take the corresponding literal.
fn probe_key(key_template: &Template, item: &Template) -> Option<String> {
    match key_template {
        Template::Reference { .. } => item_scalar(item),
        Template::Text(text) => {
            let pattern = Pattern::parse(text).ok()?;
            if pattern.is_trivial() {
                item_scalar(item)
            } else {
                None
            }
        }
        Template::Object { entries, .. } => {
            let Template::Object {
                entries: item_entries,
                ..
            } = item
            else {
                return None;
            };
            for entry in entries {
                if let Some(found) = item_entries.iter().find(|ie| ie.key == entry.key) {
                    if let Some(key) = probe_key(&entry.template, &found.template) {
                        return Some(key);
                    }
                }
            }
            None
        }
        _ => None,
    }
}

fn item_scalar(item: &Template) -> Option<String> {
    match item {
        Template::Text(text) => (!text.contains("{{")).then(|| text.clone()),
        Template::Number(text) => Some(text.clone()),
        Template::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The identifier the key template binds (`{id: key}` -> `key`).
fn key_ident(key_template: &Template) -> Option<String> {
    match key_template {
        Template::Reference { path, .. } if !path.contains('.') => Some(path.clone()),
        Template::Text(text) => {
            let pattern = Pattern::parse(text).ok()?;
            if pattern.is_trivial() {
                pattern.vars.first().map(|v| v.param.clone())
            } else {
                None
            }
        }
        Template::Object { entries, .. } => entries
            .iter()
            .find_map(|entry| key_ident(&entry.template)),
        _ => None,
    }
}

pub(super) fn render(
    ctx: &mut Context<'_>,
    array: &ArraySchema,
) -> Result<Option<Value>, SchemaError> {
    match array {
        ArraySchema::Tuple(schemas) => {
            let mut out = Vec::with_capacity(schemas.len());
            let mut pending = false;
            for (i, schema) in schemas.iter().enumerate() {
                let name = i.to_string();
                let frame = ctx.enter_subscope(&name, element_index(&name));
                let rendered = render_node(ctx, schema);
                ctx.restore(frame);
                match rendered? {
                    Some(value) => out.push(value),
                    None if ctx.finalizing => out.push(Value::Null),
                    None => pending = true,
                }
            }
            if pending {
                return Ok(None);
            }
            Ok(Some(Value::Array(out)))
        }
        ArraySchema::Spread {
            archetypes,
            elements,
            aggregate,
        } => {
            if !elements.is_empty() {
                return render_elements(ctx, elements);
            }
            expand(ctx, None, false, archetypes, aggregate)
        }
        ArraySchema::Keyed {
            key,
            multi,
            archetypes,
            elements,
            aggregate,
        } => {
            if !elements.is_empty() {
                return render_elements(ctx, elements);
            }
            expand(ctx, Some(key), *multi, archetypes, aggregate)
        }
    }
}

fn render_elements(
    ctx: &mut Context<'_>,
    elements: &[ArrayElement],
) -> Result<Option<Value>, SchemaError> {
    let mut out = Vec::with_capacity(elements.len());
    let mut pending = false;
    for element in elements {
        let frame = ctx.enter_subscope(
            &element.scope_name,
            element_index(element.key.as_deref().unwrap_or(&element.scope_name)),
        );
        let rendered = render_node(ctx, &element.schema);
        ctx.restore(frame);
        match rendered? {
            Some(value) => out.push(value),
            None if ctx.finalizing => {}
            None => pending = true,
        }
    }
    if pending {
        return Ok(None);
    }
    Ok(Some(Value::Array(out)))
}

/// Expand elements from the aggregate input value: one element per map
/// entry (or list slot), with the element's aggregation bindings defined
/// before the archetypes render.
fn expand(
    ctx: &mut Context<'_>,
    key_template: Option<&Template>,
    multi: bool,
    archetypes: &[Template],
    aggregate: &Option<String>,
) -> Result<Option<Value>, SchemaError> {
    let Some(name) = aggregate else {
        if ctx.finalizing {
            return Ok(Some(Value::Array(Vec::new())));
        }
        return Ok(None);
    };

    let source = resolve_ident(ctx, name)?;
    let Some(source) = source else {
        if ctx.finalizing {
            return Ok(Some(Value::Array(Vec::new())));
        }
        return Ok(None);
    };

    let mut out = Vec::new();
    let mut pending = false;
    match &source {
        Value::Object(map) => {
            for (key, value) in map {
                let entries: Vec<&Value> = match value {
                    Value::Array(items) if multi => items.iter().collect(),
                    other => vec![other],
                };
                for (n, entry) in entries.into_iter().enumerate() {
                    let scope_name = if multi {
                        format!("{key}#{n}")
                    } else {
                        key.clone()
                    };
                    match expand_element(
                        ctx,
                        &scope_name,
                        Some(key),
                        name,
                        entry,
                        key_template,
                        archetypes,
                    )? {
                        Some(value) => out.push(value),
                        None => pending = true,
                    }
                }
            }
        }
        Value::Array(items) => {
            for (i, entry) in items.iter().enumerate() {
                let scope_name = i.to_string();
                match expand_element(ctx, &scope_name, None, name, entry, key_template, archetypes)?
                {
                    Some(value) => out.push(value),
                    None => pending = true,
                }
            }
        }
        other => {
            return Err(SchemaError::MismatchAtLocation {
                value: other.to_string(),
                reason: format!("aggregate {name} expects a map or list"),
            })
        }
    }

    if pending && !ctx.finalizing {
        return Ok(None);
    }
    Ok(Some(Value::Array(out)))
}

fn expand_element(
    ctx: &mut Context<'_>,
    scope_name: &str,
    key: Option<&str>,
    aggregate: &str,
    value: &Value,
    key_template: Option<&Template>,
    archetypes: &[Template],
) -> Result<Option<Value>, SchemaError> {
    let frame = ctx.enter_subscope(scope_name, element_index(key.unwrap_or(scope_name)));

    let outcome = (|ctx: &mut Context<'_>| {
        if let Some(key) = key {
            define_checked(ctx, &format!("{aggregate}.@key"), Value::String(key.into()))?;
        }
        define_checked(ctx, &format!("{aggregate}.@value"), value.clone())?;
        if let Value::Object(props) = value {
            for (prop, prop_value) in props {
                define_checked(ctx, &format!("{aggregate}.{prop}"), prop_value.clone())?;
            }
        }
        if let (Some(key_template), Some(key)) = (key_template, key) {
            if let Some(ident) = key_ident(key_template) {
                define_checked(ctx, &ident, Value::String(key.into()))?;
            }
        }

        let mut schema = Schema::Stub;
        if let Some(key_template) = key_template {
            schema = merge_node(ctx, &schema, key_template).map_err(|MergeFail| {
                SchemaError::MismatchAtLocation {
                    value: aggregate.to_string(),
                    reason: "key template does not fit the aggregate entry".to_string(),
                }
            })?;
        }
        for archetype in archetypes {
            schema = merge_node(ctx, &schema, archetype).map_err(|MergeFail| {
                SchemaError::MismatchAtLocation {
                    value: aggregate.to_string(),
                    reason: "archetype does not fit the aggregate entry".to_string(),
                }
            })?;
        }
        render_node(ctx, &schema)
    })(ctx);

    ctx.restore(frame);
    outcome
}

impl ArraySchema {
    pub(super) fn collect_unresolved(&self, ctx: &Context<'_>, out: &mut Vec<String>) {
        match self {
            ArraySchema::Tuple(schemas) => {
                for schema in schemas {
                    super::collect_unresolved(ctx, schema, out);
                }
            }
            ArraySchema::Spread { elements, .. } | ArraySchema::Keyed { elements, .. } => {
                for element in elements {
                    super::collect_unresolved(ctx, &element.schema, out);
                }
            }
        }
    }
}
