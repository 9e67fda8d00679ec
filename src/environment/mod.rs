//! The pluggable environment seen by schemas.
//!
//! The engine calls into the environment for identifier resolution, pattern
//! configuration, redaction, and diagnostic naming. A conforming
//! environment is read-only and idempotent across a single render.

use crate::path_utils;
use crate::pattern::{pattern_render, Pattern};
use indexmap::IndexMap;
use serde_json::Value;

/// Per-request policies.
#[derive(Debug, Clone, Copy)]
pub struct EnvironmentOptions {
    /// Whether redacted (`@secret`) patterns render real values.
    pub secrets: bool,
    /// Output formatting hint for encodings.
    pub pretty_print: bool,
    /// Whether form/search fields default to multi-valued.
    pub multivalue: bool,
}

impl EnvironmentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern methods
    pub fn with_secrets(mut self, enable: bool) -> Self {
        self.secrets = enable;
        self
    }

    pub fn with_pretty_print(mut self, enable: bool) -> Self {
        self.pretty_print = enable;
        self
    }

    pub fn with_multivalue(mut self, enable: bool) -> Self {
        self.multivalue = enable;
        self
    }
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            secrets: true,
            pretty_print: false,
            multivalue: true,
        }
    }
}

/// Capability interface the engine consumes.
pub trait Environment {
    /// Environment identity string for diagnostics.
    fn name(&self) -> &str;

    /// Resolve an identifier from the external value bag.
    fn resolve(&self, identifier: &str) -> Option<Value>;

    /// Resolve an identifier that needs evaluation; defaults to
    /// [`Environment::resolve`].
    fn evaluate(&self, identifier: &str) -> Option<Value> {
        self.resolve(identifier)
    }

    fn options(&self) -> &EnvironmentOptions;

    /// Narrow a candidate pattern set against the currently-known
    /// parameter values. `None` means no configuration survives.
    fn match_patterns(
        &self,
        patterns: &[Pattern],
        known: &IndexMap<String, String>,
    ) -> Option<Vec<Pattern>> {
        narrow_patterns(patterns, known)
    }

    /// Same narrowing, applied under render.
    fn reconfigure_patterns(
        &self,
        patterns: &[Pattern],
        known: &IndexMap<String, String>,
    ) -> Option<Vec<Pattern>> {
        self.match_patterns(patterns, known)
    }

    /// Mask a rendered secret. The default masks with the pattern source so
    /// previews stay readable.
    fn redact(&self, _value: &Value, pattern_source: &str) -> Value {
        Value::String(pattern_source.to_string())
    }

    /// Hook for intercepting expression evaluation of an identifier;
    /// `None` falls through to the engine's own evaluator.
    fn evaluating(&self, _identifier: &str, _source: &str) -> Option<Value> {
        None
    }
}

/// Default pattern narrowing: project each pattern with the known values;
/// fully-projected patterns must agree with each other, and patterns whose
/// projection disagrees with the consensus are dropped.
pub fn narrow_patterns(
    patterns: &[Pattern],
    known: &IndexMap<String, String>,
) -> Option<Vec<Pattern>> {
    let mut consensus: Option<String> = None;
    let mut projections: Vec<Option<String>> = Vec::with_capacity(patterns.len());

    for pattern in patterns {
        let projection = project(pattern, known);
        if let Some(text) = &projection {
            match &consensus {
                None => consensus = Some(text.clone()),
                Some(existing) if existing != text => {
                    projections.push(projection);
                    continue;
                }
                _ => {}
            }
        }
        projections.push(projection);
    }

    // Nothing projects yet: nothing to disagree about.
    let Some(consensus) = consensus else {
        return Some(patterns.to_vec());
    };
    let survivors: Vec<Pattern> = patterns
        .iter()
        .zip(projections.iter())
        .filter(|(_, projection)| match projection {
            Some(text) => *text == consensus,
            None => true,
        })
        .map(|(pattern, _)| pattern.clone())
        .collect();

    if survivors.is_empty() {
        None
    } else {
        Some(survivors)
    }
}

/// The fully-substituted source of a pattern, when every parameter is known.
fn project(pattern: &Pattern, known: &IndexMap<String, String>) -> Option<String> {
    if pattern.is_literal() {
        return Some(pattern.source.clone());
    }
    let mut args = Vec::with_capacity(pattern.vars.len());
    for var in &pattern.vars {
        if var.param.is_empty() {
            return None;
        }
        args.push(known.get(&var.param)?.clone());
    }
    Some(pattern_render(pattern, &args))
}

/// Environment over a plain input value map.
#[derive(Debug, Clone)]
pub struct ScriptEnvironment {
    name: String,
    values: Value,
    options: EnvironmentOptions,
}

impl Default for ScriptEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEnvironment {
    pub fn new() -> Self {
        Self {
            name: "script".to_string(),
            values: Value::Object(serde_json::Map::new()),
            options: EnvironmentOptions::default(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::new()
        }
    }

    /// Replace the input value bag.
    pub fn with_values(mut self, values: Value) -> Self {
        self.values = values;
        self
    }

    pub fn with_options(mut self, options: EnvironmentOptions) -> Self {
        self.options = options;
        self
    }

    /// Insert one input value.
    pub fn set(&mut self, name: &str, value: Value) {
        if let Value::Object(map) = &mut self.values {
            map.insert(name.to_string(), value);
        }
    }

    pub fn values(&self) -> &Value {
        &self.values
    }
}

impl Environment for ScriptEnvironment {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, identifier: &str) -> Option<Value> {
        path_utils::lookup_path(&self.values, identifier).cloned()
    }

    fn options(&self) -> &EnvironmentOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_script_environment_resolve() {
        let env = ScriptEnvironment::new().with_values(json!({"a": {"b": 1}, "x": "v"}));
        assert_eq!(env.resolve("x"), Some(json!("v")));
        assert_eq!(env.resolve("a.b"), Some(json!(1)));
        assert_eq!(env.resolve("missing"), None);
    }

    #[test]
    fn test_narrow_patterns_drops_disagreement() {
        let lit = Pattern::parse("https://api.example.com").unwrap();
        let other = Pattern::parse("https://other.example.com").unwrap();
        let open = Pattern::parse("https://{{host}}").unwrap();

        let known = IndexMap::new();
        let narrowed = narrow_patterns(&[lit.clone(), other.clone(), open.clone()], &known).unwrap();
        // First literal wins the consensus; the disagreeing literal drops.
        assert_eq!(narrowed.len(), 2);
        assert_eq!(narrowed[0].source, lit.source);
        assert_eq!(narrowed[1].source, open.source);
    }

    #[test]
    fn test_narrow_patterns_with_known_values() {
        let a = Pattern::parse("{{proto}}://x").unwrap();
        let lit = Pattern::parse("https://x").unwrap();
        let mut known = IndexMap::new();
        known.insert("proto".to_string(), "https".to_string());
        let narrowed = narrow_patterns(&[a, lit], &known).unwrap();
        assert_eq!(narrowed.len(), 2);
    }

    #[test]
    fn test_options_builder() {
        let options = EnvironmentOptions::new()
            .with_secrets(false)
            .with_pretty_print(true)
            .with_multivalue(false);
        assert!(!options.secrets);
        assert!(options.pretty_print);
        assert!(!options.multivalue);
    }
}
