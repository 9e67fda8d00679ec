//! Object schema: key -> subschema in insertion order, plus spreads.
//!
//! Template keys merge in insertion order; keys new to the schema are
//! added, keys present in both recurse. A `?`-suffixed key is optional:
//! it merges even when the observed value omits it and its render may be
//! omitted. A spread either merges an inline object at this level or
//! registers a named aggregation that captures leftover observed keys.

use super::context::{Context, Mode};
use super::{define_checked, merge_node, render_node, resolve_ident, MergeFail, Schema};
use crate::error::SchemaError;
use crate::path_utils;
use crate::scope::AggregateType;
use crate::template::{ObjectEntry, Template};
use indexmap::IndexMap;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntrySchema {
    pub schema: Schema,
    pub optional: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectSchema {
    pub entries: IndexMap<String, ObjectEntrySchema>,
    /// Aggregation names registered by reference spreads; leftover observed
    /// keys bind under these and render re-expands them.
    pub spreads: Vec<String>,
}

pub(super) fn scope(ctx: &mut Context<'_>, object: &ObjectSchema) {
    for (key, entry) in &object.entries {
        ctx.push_key(key);
        super::scope_node(ctx, &entry.schema);
        ctx.pop_key();
    }
    for name in &object.spreads {
        let root = path_utils::root_segment(name).to_string();
        if let Err(err) = ctx
            .arena
            .declare_aggregate(ctx.scope, &root, AggregateType::Keyed)
        {
            ctx.diagnose(err);
        }
    }
}

pub(super) fn merge(
    ctx: &mut Context<'_>,
    object: &ObjectSchema,
    template: &Template,
) -> Result<ObjectSchema, MergeFail> {
    let Template::Object { entries, spreads } = template else {
        ctx.diagnose(SchemaError::TypeMismatch {
            expected: "object".to_string(),
            found: template.shape_name().to_string(),
        });
        return Err(MergeFail);
    };

    let mut out = object.clone();
    let prior_keys: Vec<String> = object.entries.keys().cloned().collect();

    for ObjectEntry {
        key,
        optional,
        template,
    } in entries
    {
        ctx.push_key(key);
        let merged = match out.entries.get(key) {
            Some(existing) => merge_node(ctx, &existing.schema, template),
            None => merge_node(ctx, &Schema::Stub, template),
        };
        let merged = match merged {
            Ok(merged) => merged,
            Err(fail) => {
                ctx.pop_key();
                return Err(fail);
            }
        };
        let optional = *optional
            || out
                .entries
                .get(key)
                .map(|entry| entry.optional)
                .unwrap_or(false);
        out.entries.insert(
            key.clone(),
            ObjectEntrySchema {
                schema: merged,
                optional,
            },
        );
        ctx.pop_key();
    }

    for spread in spreads {
        match spread {
            Template::Object { .. } => {
                out = merge(ctx, &out, spread)?;
            }
            Template::Reference { path, .. } => {
                let root = path_utils::root_segment(path).to_string();
                if let Err(err) =
                    ctx.arena
                        .declare_aggregate(ctx.scope, &root, AggregateType::Keyed)
                {
                    ctx.diagnose(err);
                    return Err(MergeFail);
                }
                if !out.spreads.contains(&root) {
                    out.spreads.push(root);
                }
            }
            other => {
                ctx.diagnose(SchemaError::TypeMismatch {
                    expected: "object or reference spread".to_string(),
                    found: other.shape_name().to_string(),
                });
                return Err(MergeFail);
            }
        }
    }

    // Matching an observed object: keys the schema did not claim bind into
    // the registered spread aggregation.
    if ctx.mode == Mode::Match {
        if let Some(spread) = object.spreads.first().cloned() {
            for entry in entries {
                if prior_keys.contains(&entry.key) {
                    continue;
                }
                if let Some(value) = entry.template.literal_value() {
                    let name = format!("{spread}.{}", entry.key);
                    if define_checked(ctx, &name, value).is_err() {
                        return Err(MergeFail);
                    }
                }
            }
        }
    }

    Ok(out)
}

pub(super) fn render(
    ctx: &mut Context<'_>,
    object: &ObjectSchema,
) -> Result<Option<Value>, SchemaError> {
    let mut map = serde_json::Map::new();
    let mut pending = false;

    for (key, entry) in &object.entries {
        ctx.push_key(key);
        // Hidden entries render for side-effects only.
        if let Schema::Hidden(inner) = &entry.schema {
            render_node(ctx, inner)?;
            ctx.pop_key();
            continue;
        }
        let rendered = match render_node(ctx, &entry.schema) {
            // An optional key absorbs its slot staying undefined.
            Err(SchemaError::Undefined { .. }) if entry.optional && ctx.finalizing => {
                ctx.pop_key();
                continue;
            }
            other => other?,
        };
        match rendered {
            Some(value) => {
                map.insert(key.clone(), value);
            }
            None => {
                // Optional slots wait for the finalizing pass too: a slot
                // pending now may still resolve from a later sibling.
                if !ctx.finalizing {
                    pending = true;
                }
            }
        }
        ctx.pop_key();
    }

    // Spread aggregations re-expand: resolved object entries append after
    // the declared keys.
    for name in &object.spreads {
        match resolve_ident(ctx, name)? {
            Some(Value::Object(extra)) => {
                for (key, value) in extra {
                    map.entry(key).or_insert(value);
                }
            }
            Some(other) => {
                return Err(SchemaError::MismatchAtLocation {
                    value: other.to_string(),
                    reason: format!("spread {name} expects an object"),
                })
            }
            None => {
                if !ctx.finalizing {
                    pending = true;
                }
            }
        }
    }

    if pending {
        return Ok(None);
    }
    Ok(Some(Value::Object(map)))
}
