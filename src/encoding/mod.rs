//! Encoding codecs: string <-> structured value at a schema boundary.
//!
//! An encoding schema pairs an outer string-typed slot with an inner schema
//! of the decoded shape; codecs must round-trip so that match and render
//! are inverses. Encodings stack (base64 over json is common).

use crate::error::SchemaError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use url::form_urlencoded;

/// The codec applied at an encoding boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingKind {
    /// JSON text <-> object/array/scalar; key order preserved.
    Json,
    /// Base64 text <-> inner string bytes.
    Base64,
    /// `application/x-www-form-urlencoded` text <-> map.
    Form,
    /// Identity.
    Text,
}

impl EncodingKind {
    pub fn name(&self) -> &'static str {
        match self {
            EncodingKind::Json => "json",
            EncodingKind::Base64 => "base64",
            EncodingKind::Form => "form",
            EncodingKind::Text => "text",
        }
    }

    /// Parse an encoding name as written in template call position.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "json" => Some(EncodingKind::Json),
            "base64" => Some(EncodingKind::Base64),
            "form" => Some(EncodingKind::Form),
            "text" => Some(EncodingKind::Text),
            _ => None,
        }
    }

    /// Decode an encoded string into the inner value shape.
    pub fn decode(&self, text: &str, multivalue: bool) -> Result<Value, SchemaError> {
        match self {
            EncodingKind::Text => Ok(Value::String(text.to_string())),
            EncodingKind::Json => {
                serde_json::from_str(text).map_err(|e| SchemaError::DecodeFailure {
                    encoding: "json".to_string(),
                    reason: e.to_string(),
                })
            }
            EncodingKind::Base64 => {
                let bytes = BASE64
                    .decode(text)
                    .map_err(|e| SchemaError::DecodeFailure {
                        encoding: "base64".to_string(),
                        reason: e.to_string(),
                    })?;
                let inner = String::from_utf8(bytes).map_err(|e| SchemaError::DecodeFailure {
                    encoding: "base64".to_string(),
                    reason: e.to_string(),
                })?;
                Ok(Value::String(inner))
            }
            EncodingKind::Form => Ok(decode_form(text, multivalue)),
        }
    }

    /// Encode the inner value back to its string form.
    pub fn encode(&self, value: &Value, pretty: bool) -> Result<String, SchemaError> {
        match self {
            EncodingKind::Text => match value {
                Value::String(s) => Ok(s.clone()),
                other => Ok(other.to_string()),
            },
            EncodingKind::Json => {
                let out = if pretty {
                    serde_json::to_string_pretty(value)
                } else {
                    serde_json::to_string(value)
                };
                out.map_err(|e| SchemaError::DecodeFailure {
                    encoding: "json".to_string(),
                    reason: e.to_string(),
                })
            }
            EncodingKind::Base64 => {
                let inner = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Ok(BASE64.encode(inner.as_bytes()))
            }
            EncodingKind::Form => encode_form(value),
        }
    }
}

/// Decode form text to a map; repeated fields become arrays when
/// `multivalue` is set, otherwise the last occurrence wins.
fn decode_form(text: &str, multivalue: bool) -> Value {
    let mut map = serde_json::Map::new();
    for (key, value) in form_urlencoded::parse(text.as_bytes()) {
        let key = key.into_owned();
        let value = Value::String(value.into_owned());
        match map.get_mut(&key) {
            Some(existing) if multivalue => {
                if let Value::Array(items) = existing {
                    items.push(value);
                } else {
                    let prior = existing.clone();
                    *existing = Value::Array(vec![prior, value]);
                }
            }
            Some(existing) => *existing = value,
            None => {
                map.insert(key, value);
            }
        }
    }
    Value::Object(map)
}

fn encode_form(value: &Value) -> Result<String, SchemaError> {
    let Value::Object(map) = value else {
        return Err(SchemaError::DecodeFailure {
            encoding: "form".to_string(),
            reason: format!("form encoding expects an object, found {value}"),
        });
    };
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, entry) in map {
        match entry {
            Value::Array(items) => {
                for item in items {
                    serializer.append_pair(key, &scalar_text(item));
                }
            }
            other => {
                serializer.append_pair(key, &scalar_text(other));
            }
        }
    }
    Ok(serializer.finish())
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
