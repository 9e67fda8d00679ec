//! Template text parser.
//!
//! Templates are free-form value shapes with engine extensions over JSON:
//!
//! ```text
//! { key: tmpl, opt?: tmpl, ...spread }     objects, optional keys, spreads
//! [a, b, c]                                 tuples
//! [...archetype]                            array spread
//! {keyTmpl} * [...archetype]                keyed list (single-valued)
//! {keyTmpl} ** [...archetype]               keyed list (multi-valued)
//! json(t) base64(t) form(t) text(t)         encodings
//! hidden(t)                                 render for side-effects only
//! bare.identifier                           reference
//! a = b = (expr)                            chained reference equalities
//! "text with {{patterns}}"                  scalar template
//! ```
//!
//! Plain JSON values convert directly via [`Template::from_value`]; their
//! strings are scanned for patterns at merge time.

use crate::encoding::EncodingKind;
use crate::error::SchemaError;
use crate::pattern::HintFlags;
use serde_json::Value;

/// One parsed object entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry {
    pub key: String,
    pub optional: bool,
    pub template: Template,
}

/// A user-supplied partial value shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Null,
    Bool(bool),
    /// Raw number text; precision is preserved until typed.
    Number(String),
    /// String template; may embed `{{...}}` patterns.
    Text(String),
    /// Bare identifier in value position, with optional chained aliases
    /// (`a = b = (expr)` makes `a` the reference, `b` an alias).
    Reference {
        path: String,
        hint: HintFlags,
        aliases: Vec<String>,
        expression: Option<String>,
    },
    Object {
        entries: Vec<ObjectEntry>,
        spreads: Vec<Template>,
    },
    Tuple(Vec<Template>),
    /// `[...archetype]` - one subtemplate applied to every element.
    Spread(Box<Template>),
    /// `{keyTmpl} * [...archetype]` / `**` for multi-valued.
    Keyed {
        key: Box<Template>,
        multi: bool,
        archetype: Box<Template>,
    },
    Encoded {
        encoding: EncodingKind,
        inner: Box<Template>,
    },
    Hidden(Box<Template>),
}

impl Template {
    /// Parse template text.
    pub fn parse(text: &str) -> Result<Template, SchemaError> {
        let mut parser = Parser {
            source: text,
            bytes: text.as_bytes(),
            pos: 0,
        };
        parser.skip_ws();
        let template = parser.value()?;
        parser.skip_ws();
        if parser.pos < parser.bytes.len() {
            return Err(parser.error("trailing input"));
        }
        Ok(template)
    }

    /// Convert a plain JSON value into a template.
    pub fn from_value(value: &Value) -> Template {
        match value {
            Value::Null => Template::Null,
            Value::Bool(b) => Template::Bool(*b),
            Value::Number(n) => Template::Number(n.to_string()),
            Value::String(s) => Template::Text(s.clone()),
            Value::Array(items) => {
                Template::Tuple(items.iter().map(Template::from_value).collect())
            }
            Value::Object(map) => Template::Object {
                entries: map
                    .iter()
                    .map(|(key, entry)| ObjectEntry {
                        key: key.clone(),
                        optional: false,
                        template: Template::from_value(entry),
                    })
                    .collect(),
                spreads: Vec::new(),
            },
        }
    }

    /// The concrete value a template spells, when it is fully literal
    /// (no patterns, references, spreads, or optional keys).
    pub fn literal_value(&self) -> Option<Value> {
        match self {
            Template::Null => Some(Value::Null),
            Template::Bool(b) => Some(Value::Bool(*b)),
            Template::Number(text) => serde_json::from_str::<serde_json::Number>(text)
                .ok()
                .map(Value::Number),
            Template::Text(s) => (!s.contains("{{")).then(|| Value::String(s.clone())),
            Template::Tuple(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.literal_value()?);
                }
                Some(Value::Array(out))
            }
            Template::Object { entries, spreads } => {
                if !spreads.is_empty() {
                    return None;
                }
                let mut map = serde_json::Map::new();
                for entry in entries {
                    if entry.optional {
                        return None;
                    }
                    map.insert(entry.key.clone(), entry.template.literal_value()?);
                }
                Some(Value::Object(map))
            }
            _ => None,
        }
    }

    /// Shape name for type-mismatch diagnostics.
    pub fn shape_name(&self) -> &'static str {
        match self {
            Template::Null => "null",
            Template::Bool(_) => "boolean",
            Template::Number(_) => "number",
            Template::Text(_) => "string",
            Template::Reference { .. } => "reference",
            Template::Object { .. } => "object",
            Template::Tuple(_) => "array",
            Template::Spread(_) => "array spread",
            Template::Keyed { .. } => "keyed list",
            Template::Encoded { .. } => "encoded",
            Template::Hidden(_) => "hidden",
        }
    }
}

struct Parser<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: impl Into<String>) -> SchemaError {
        SchemaError::TemplateParse {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: u8) -> Result<(), SchemaError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}", c as char)))
        }
    }

    /// A full template value, including the `* [...]` keyed-list infix.
    fn value(&mut self) -> Result<Template, SchemaError> {
        let primary = self.primary()?;
        self.skip_ws();

        if self.peek() == Some(b'*') {
            self.pos += 1;
            let multi = self.eat(b'*');
            self.skip_ws();
            let archetype = match self.primary()? {
                Template::Spread(inner) => inner,
                other => Box::new(other),
            };
            return Ok(Template::Keyed {
                key: Box::new(primary),
                multi,
                archetype,
            });
        }
        Ok(primary)
    }

    fn primary(&mut self) -> Result<Template, SchemaError> {
        self.skip_ws();
        match self.peek() {
            Some(b'{') => self.object(),
            Some(b'[') => self.array(),
            Some(b'"') | Some(b'\'') => {
                let text = self.string()?;
                Ok(Template::Text(text))
            }
            Some(c) if c.is_ascii_digit() || c == b'-' => self.number(),
            Some(c) if ident_start(c) => self.word(),
            _ => Err(self.error("expected template value")),
        }
    }

    fn object(&mut self) -> Result<Template, SchemaError> {
        self.expect(b'{')?;
        let mut entries = Vec::new();
        let mut spreads = Vec::new();

        loop {
            self.skip_ws();
            if self.eat(b'}') {
                break;
            }

            if self.source[self.pos..].starts_with("...") {
                self.pos += 3;
                spreads.push(self.value()?);
            } else {
                let key = self.entry_key()?;
                self.skip_ws();
                let optional = self.eat(b'?');
                self.skip_ws();

                if self.eat(b':') {
                    let template = self.value()?;
                    if key == "$flat" {
                        spreads.push(template);
                    } else {
                        entries.push(ObjectEntry {
                            key,
                            optional,
                            template,
                        });
                    }
                } else {
                    // Shorthand `{ key }` binds the field to a same-named
                    // reference.
                    entries.push(ObjectEntry {
                        template: Template::Reference {
                            path: key.clone(),
                            hint: HintFlags::default(),
                            aliases: Vec::new(),
                            expression: None,
                        },
                        key,
                        optional,
                    });
                }
            }

            self.skip_ws();
            if self.eat(b',') {
                continue;
            }
            self.skip_ws();
            self.expect(b'}')?;
            break;
        }

        Ok(Template::Object { entries, spreads })
    }

    fn entry_key(&mut self) -> Result<String, SchemaError> {
        self.skip_ws();
        match self.peek() {
            Some(b'"') | Some(b'\'') => self.string(),
            Some(c) if ident_start(c) || c.is_ascii_digit() => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| ident_continue(c) || c == b'-')
                {
                    self.pos += 1;
                }
                Ok(self.source[start..self.pos].to_string())
            }
            _ => Err(self.error("expected object key")),
        }
    }

    fn array(&mut self) -> Result<Template, SchemaError> {
        self.expect(b'[')?;
        self.skip_ws();

        if self.source[self.pos..].starts_with("...") {
            self.pos += 3;
            let archetype = self.value()?;
            self.skip_ws();
            self.eat(b',');
            self.skip_ws();
            self.expect(b']')?;
            return Ok(Template::Spread(Box::new(archetype)));
        }

        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(b']') {
                break;
            }
            items.push(self.value()?);
            self.skip_ws();
            if self.eat(b',') {
                continue;
            }
            self.skip_ws();
            self.expect(b']')?;
            break;
        }
        Ok(Template::Tuple(items))
    }

    fn string(&mut self) -> Result<String, SchemaError> {
        let quote = self.peek().unwrap();
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unterminated string"));
            };
            if c == quote {
                self.pos += 1;
                return Ok(out);
            }
            if c == b'\\' {
                self.pos += 1;
                let Some(escaped) = self.peek() else {
                    return Err(self.error("unterminated escape"));
                };
                out.push(match escaped {
                    b'n' => '\n',
                    b't' => '\t',
                    b'r' => '\r',
                    other => other as char,
                });
                self.pos += 1;
            } else {
                let ch = self.source[self.pos..].chars().next().unwrap();
                out.push(ch);
                self.pos += ch.len_utf8();
            }
        }
    }

    fn number(&mut self) -> Result<Template, SchemaError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == b'.' || c == b'e' || c == b'E' || c == b'+' || c == b'-')
        {
            // Stop a trailing `-`/`+` that is not an exponent sign.
            if (self.bytes[self.pos] == b'-' || self.bytes[self.pos] == b'+')
                && !matches!(self.bytes[self.pos - 1], b'e' | b'E')
            {
                break;
            }
            self.pos += 1;
        }
        let text = &self.source[start..self.pos];
        if serde_json::from_str::<serde_json::Number>(text).is_err() {
            return Err(self.error(format!("malformed number {text:?}")));
        }
        Ok(Template::Number(text.to_string()))
    }

    /// A bare word: keyword literal, encoding/hidden call, or reference
    /// chain.
    fn word(&mut self) -> Result<Template, SchemaError> {
        let path = self.ident_path()?;

        match path.as_str() {
            "null" => return Ok(Template::Null),
            "true" => return Ok(Template::Bool(true)),
            "false" => return Ok(Template::Bool(false)),
            _ => {}
        }

        self.skip_ws();
        if self.peek() == Some(b'(') && !path.contains('.') {
            if path == "hidden" {
                self.expect(b'(')?;
                let inner = self.value()?;
                self.skip_ws();
                self.expect(b')')?;
                return Ok(Template::Hidden(Box::new(inner)));
            }
            if let Some(encoding) = EncodingKind::from_name(&path) {
                self.expect(b'(')?;
                let inner = self.value()?;
                self.skip_ws();
                self.expect(b')')?;
                return Ok(Template::Encoded {
                    encoding,
                    inner: Box::new(inner),
                });
            }
        }

        // Reference chain: `a = b = (expr)` or `a = b = c`.
        let mut aliases = Vec::new();
        let mut expression = None;
        loop {
            self.skip_ws();
            if self.peek() != Some(b'=') || self.source[self.pos..].starts_with("==") {
                break;
            }
            self.pos += 1;
            self.skip_ws();

            // Another bare identifier continues the alias chain only when
            // followed by `=` or a value terminator.
            let mark = self.pos;
            if self.peek().is_some_and(ident_start) {
                if let Ok(next) = self.ident_path() {
                    let mut probe = Parser {
                        source: self.source,
                        bytes: self.bytes,
                        pos: self.pos,
                    };
                    probe.skip_ws();
                    match probe.peek() {
                        Some(b'=') if !probe.source[probe.pos..].starts_with("==") => {
                            aliases.push(next);
                            continue;
                        }
                        None | Some(b',') | Some(b'}') | Some(b']') => {
                            aliases.push(next);
                            break;
                        }
                        _ => self.pos = mark,
                    }
                }
            }

            expression = Some(self.expression_text()?);
            break;
        }

        Ok(Template::Reference {
            path,
            hint: HintFlags::default(),
            aliases,
            expression,
        })
    }

    fn ident_path(&mut self) -> Result<String, SchemaError> {
        let start = self.pos;
        loop {
            if !self.peek().is_some_and(ident_start) {
                return Err(self.error("expected identifier"));
            }
            while self.peek().is_some_and(ident_continue) {
                self.pos += 1;
            }
            // Dotted continuation.
            if self.peek() == Some(b'.')
                && self.bytes.get(self.pos + 1).copied().is_some_and(ident_start)
            {
                self.pos += 1;
                continue;
            }
            break;
        }
        Ok(self.source[start..self.pos].to_string())
    }

    /// Raw expression text up to a `,` / `}` / `]` at bracket depth zero.
    fn expression_text(&mut self) -> Result<String, SchemaError> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' if depth > 0 => depth -= 1,
                b')' | b']' | b'}' | b',' => break,
                b'"' | b'\'' => {
                    self.string()?;
                    continue;
                }
                _ => {}
            }
            self.pos += 1;
        }
        let text = self.source[start..self.pos].trim().to_string();
        if text.is_empty() {
            return Err(self.error("empty expression"));
        }
        Ok(text)
    }
}

fn ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$'
}

fn ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
}
