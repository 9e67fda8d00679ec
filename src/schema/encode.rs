//! Encoding schema: a string-typed boundary over an inner decoded shape.
//!
//! Merging a string decodes it and merges the decoded value into the inner
//! schema; merging a structured template goes straight to the inner schema.
//! Rendering renders the inner shape and encodes the result. Encodings
//! stack: `base64(json(content))` is two boundaries.

use super::context::Context;
use super::{merge_node, render_node, MergeFail, Schema};
use crate::encoding::EncodingKind;
use crate::template::Template;
use crate::error::SchemaError;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct EncodingSchema {
    pub encoding: EncodingKind,
    pub inner: Box<Schema>,
}

/// Merge a decoded-shape template into the inner schema.
pub(super) fn merge(
    ctx: &mut Context<'_>,
    encoding: &EncodingSchema,
    inner_template: &Template,
) -> Result<EncodingSchema, MergeFail> {
    let inner = merge_node(ctx, &encoding.inner, inner_template)?;
    Ok(EncodingSchema {
        encoding: encoding.encoding,
        inner: Box::new(inner),
    })
}

/// Merge a template sitting at the encoded (string) side of the boundary.
pub(super) fn merge_encoded(
    ctx: &mut Context<'_>,
    encoding: &EncodingSchema,
    template: &Template,
) -> Result<EncodingSchema, MergeFail> {
    match template {
        Template::Text(text) if !text.contains("{{") => {
            let multivalue = ctx.environment.options().multivalue;
            match encoding.encoding.decode(text, multivalue) {
                Ok(decoded) => merge(ctx, encoding, &Template::from_value(&decoded)),
                Err(err) => {
                    ctx.diagnose(err);
                    Err(MergeFail)
                }
            }
        }
        // A patterned string or structured template addresses the decoded
        // shape directly.
        other => merge(ctx, encoding, other),
    }
}

pub(super) fn render(
    ctx: &mut Context<'_>,
    encoding: &EncodingSchema,
) -> Result<Option<Value>, SchemaError> {
    match render_node(ctx, &encoding.inner)? {
        Some(value) => {
            let pretty = ctx.environment.options().pretty_print;
            let text = encoding.encoding.encode(&value, pretty)?;
            Ok(Some(Value::String(text)))
        }
        None => Ok(None),
    }
}
