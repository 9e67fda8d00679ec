//! HTTPS request/response schemas assembled from the primitives.
//!
//! A request is `{ method, origin, pathname, searchParams, headers, body,
//! meta }`. The base template binds the URL parts to identifiers, captures
//! unclaimed search params and headers through spread aggregations, and
//! wraps the body in an encoding boundary sensed from `Content-Type`.
//! Endpoint layers merge over the base; the ask (or an observed response)
//! merges last in match mode.

use crate::driver::{merge_schema, render_schema, MergeOptions, Rendered};
use crate::encoding::EncodingKind;
use crate::environment::Environment;
use crate::error::{Diagnostic, SchemaError};
use crate::matcher::{apply_layers, ProgressiveMatch};
use crate::pattern::HintFlags;
use crate::schema::Schema;
use crate::template::{ObjectEntry, Template};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::form_urlencoded;

/// A concrete (or partial) HTTP request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpsRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<String>,
}

/// An observed HTTP response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpsResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Failure surfaced to HTTPS consumers.
#[derive(Debug, thiserror::Error)]
pub enum HttpsFailure {
    #[error("template error: {0}")]
    Template(#[from] SchemaError),

    #[error("no matching configuration ({} diagnostics)", .0.len())]
    NoMatch(Vec<Diagnostic>),

    #[error("render failed: {0}")]
    Render(Diagnostic),
}

/// Choose the body encoding from a Content-Type header value.
pub fn sense_body_encoding(content_type: Option<&str>) -> EncodingKind {
    match content_type {
        Some(value) if value.contains("json") => EncodingKind::Json,
        Some(value) if value.contains("x-www-form-urlencoded") => EncodingKind::Form,
        _ => EncodingKind::Text,
    }
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn entry(key: &str, optional: bool, template: Template) -> ObjectEntry {
    ObjectEntry {
        key: key.to_string(),
        optional,
        template,
    }
}

fn spread_of(name: &str) -> Template {
    Template::Object {
        entries: Vec::new(),
        spreads: vec![Template::Reference {
            path: name.to_string(),
            hint: HintFlags::default(),
            aliases: Vec::new(),
            expression: None,
        }],
    }
}

fn body_hole(encoding: EncodingKind) -> Template {
    let reference = Template::Reference {
        path: "body".to_string(),
        hint: HintFlags {
            optional: true,
            ..HintFlags::default()
        },
        aliases: Vec::new(),
        expression: None,
    };
    match encoding {
        EncodingKind::Text => reference,
        other => Template::Encoded {
            encoding: other,
            inner: Box::new(reference),
        },
    }
}

/// The base request template: URL parts bound to identifiers, spread
/// aggregations for unclaimed search params and headers, and the encoded
/// body hole.
pub fn base_request_template(body_encoding: EncodingKind) -> Template {
    Template::Object {
        entries: vec![
            entry("method", false, Template::Text("{{method}}".into())),
            entry("origin", true, Template::Text("{{?origin}}".into())),
            entry("pathname", true, Template::Text("{{?pathname}}".into())),
            entry("searchParams", true, spread_of("search")),
            entry("headers", true, spread_of("headers")),
            entry("body", true, body_hole(body_encoding)),
            entry("meta", true, spread_of("meta")),
        ],
        spreads: Vec::new(),
    }
}

/// The base response template: status bound, headers aggregated, body
/// decoded through the sensed encoding.
pub fn base_response_template(body_encoding: EncodingKind) -> Template {
    Template::Object {
        entries: vec![
            entry("status", false, Template::Text("{{status}}".into())),
            entry("headers", true, spread_of("headers")),
            entry("body", true, body_hole(body_encoding)),
        ],
        spreads: Vec::new(),
    }
}

/// Convert a concrete request into its template shape, splitting the URL.
pub fn request_template(request: &HttpsRequest) -> Result<Template, SchemaError> {
    let parsed = url::Url::parse(&request.url).map_err(|e| SchemaError::TemplateParse {
        offset: 0,
        reason: format!("invalid url {:?}: {e}", request.url),
    })?;

    let mut entries = vec![
        entry("method", false, Template::Text(request.method.clone())),
        entry("origin", false, Template::Text(origin_of(&parsed))),
        entry(
            "pathname",
            false,
            Template::Text(parsed.path().to_string()),
        ),
    ];

    let search = pairs_template(parsed.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())));
    if let Some(search) = search {
        entries.push(entry("searchParams", false, search));
    }

    let headers = pairs_template(
        request
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone())),
    );
    if let Some(headers) = headers {
        entries.push(entry("headers", false, headers));
    }

    if let Some(body) = &request.body {
        entries.push(entry("body", false, Template::Text(body.clone())));
    }

    Ok(Template::Object {
        entries,
        spreads: Vec::new(),
    })
}

/// Convert an observed response into its template shape.
pub fn response_template(response: &HttpsResponse) -> Template {
    let mut entries = vec![entry(
        "status",
        false,
        Template::Number(response.status.to_string()),
    )];

    let headers = pairs_template(
        response
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone())),
    );
    if let Some(headers) = headers {
        entries.push(entry("headers", false, headers));
    }
    if let Some(body) = &response.body {
        entries.push(entry("body", false, Template::Text(body.clone())));
    }

    Template::Object {
        entries,
        spreads: Vec::new(),
    }
}

fn origin_of(url: &url::Url) -> String {
    let mut origin = format!("{}://", url.scheme());
    if let Some(host) = url.host_str() {
        origin.push_str(host);
    }
    if let Some(port) = url.port() {
        origin.push_str(&format!(":{port}"));
    }
    origin
}

/// Repeated keys collect into tuples, preserving order of first sight.
fn pairs_template(pairs: impl Iterator<Item = (String, String)>) -> Option<Template> {
    let mut entries: Vec<ObjectEntry> = Vec::new();
    for (key, value) in pairs {
        let text = Template::Text(value);
        match entries.iter_mut().find(|entry| entry.key == key) {
            Some(existing) => match &mut existing.template {
                Template::Tuple(items) => items.push(text),
                single => {
                    let prior = single.clone();
                    *single = Template::Tuple(vec![prior, text]);
                }
            },
            None => entries.push(entry(&key, false, text)),
        }
    }
    if entries.is_empty() {
        return None;
    }
    Some(Template::Object {
        entries,
        spreads: Vec::new(),
    })
}

/// A fully-derived request plus its value bag.
#[derive(Debug)]
pub struct ResolvedRequest {
    pub request: HttpsRequest,
    pub rendered: Rendered,
}

/// Layered HTTPS engine: endpoint templates fold over the base, the ask
/// matches last, and the response templates drive value extraction.
#[derive(Debug, Default)]
pub struct HttpsEngine {
    request_layers: Vec<Template>,
    response_layers: Vec<Template>,
}

impl HttpsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint request template layer (template text).
    pub fn layer(&mut self, text: &str) -> Result<&mut Self, SchemaError> {
        self.request_layers.push(Template::parse(text)?);
        Ok(self)
    }

    /// Add a response template layer (template text).
    pub fn response_layer(&mut self, text: &str) -> Result<&mut Self, SchemaError> {
        self.response_layers.push(Template::parse(text)?);
        Ok(self)
    }

    /// Unify an ask against the layered templates and render the complete
    /// request.
    pub fn resolve_request(
        &self,
        ask: &HttpsRequest,
        environment: &dyn Environment,
    ) -> Result<ResolvedRequest, HttpsFailure> {
        let encoding = sense_body_encoding(header_value(&ask.headers, "content-type"));

        // Base plus endpoint layers, in merge mode.
        let mut layers = vec![base_request_template(encoding)];
        layers.extend(self.request_layers.iter().cloned());
        let ProgressiveMatch {
            schema, rejected, ..
        } = apply_layers(MergeOptions::merge(), Schema::Stub, &layers, environment);
        if !rejected.is_empty() {
            let diagnostics = rejected.into_iter().flat_map(|(_, d)| d).collect();
            return Err(HttpsFailure::NoMatch(diagnostics));
        }

        // The ask merges in match mode: its literals capture bindings.
        let ask_template = request_template(ask)?;
        let outcome = merge_schema(
            MergeOptions::match_build(),
            &schema,
            &ask_template,
            environment,
        );
        let Some(schema) = outcome.schema else {
            return Err(HttpsFailure::NoMatch(outcome.diagnostics));
        };

        let rendered = render_schema(&schema, environment).map_err(HttpsFailure::Render)?;
        let request = assemble_request(&rendered.value);
        Ok(ResolvedRequest { request, rendered })
    }

    /// Match an observed response against the response layers, extracting
    /// named values.
    pub fn match_response(
        &self,
        response: &HttpsResponse,
        environment: &dyn Environment,
    ) -> Result<ProgressiveMatch, HttpsFailure> {
        let encoding = sense_body_encoding(header_value(&response.headers, "content-type"));

        let mut layers = vec![base_response_template(encoding)];
        layers.extend(self.response_layers.iter().cloned());
        let folded = apply_layers(MergeOptions::merge(), Schema::Stub, &layers, environment);
        if !folded.rejected.is_empty() {
            let diagnostics = folded.rejected.into_iter().flat_map(|(_, d)| d).collect();
            return Err(HttpsFailure::NoMatch(diagnostics));
        }

        let observed = response_template(response);
        let matched = apply_layers(
            MergeOptions::match_validate(),
            folded.schema,
            std::slice::from_ref(&observed),
            environment,
        );
        if !matched.all_applied() {
            let diagnostics = matched.rejected.into_iter().flat_map(|(_, d)| d).collect();
            return Err(HttpsFailure::NoMatch(diagnostics));
        }
        Ok(matched)
    }
}

/// Reassemble a rendered request value into a concrete request.
fn assemble_request(value: &Value) -> HttpsRequest {
    let get = |key: &str| value.get(key);
    let text = |key: &str| {
        get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    };

    let mut url = text("origin");
    url.push_str(&text("pathname"));

    if let Some(Value::Object(params)) = get("searchParams") {
        if !params.is_empty() {
            let mut serializer = form_urlencoded::Serializer::new(String::new());
            for (key, entry) in params {
                match entry {
                    Value::Array(items) => {
                        for item in items {
                            serializer.append_pair(key, item.as_str().unwrap_or_default());
                        }
                    }
                    other => {
                        let text = match other {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        serializer.append_pair(key, &text);
                    }
                }
            }
            url.push('?');
            url.push_str(&serializer.finish());
        }
    }

    let mut headers = Vec::new();
    if let Some(Value::Object(observed)) = get("headers") {
        for (key, entry) in observed {
            match entry {
                Value::Array(items) => {
                    for item in items {
                        headers.push((key.clone(), item.as_str().unwrap_or_default().to_string()));
                    }
                }
                other => headers.push((
                    key.clone(),
                    other
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| other.to_string()),
                )),
            }
        }
    }

    HttpsRequest {
        method: text("method"),
        url,
        headers,
        body: get("body").and_then(Value::as_str).map(str::to_string),
    }
}
