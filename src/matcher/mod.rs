//! Progressive matcher: fold a sequence of template layers into one schema.
//!
//! Layers apply in caller order (service config, endpoint template,
//! mixins, then the ask itself). A failing layer rolls back only itself:
//! its diagnostics are collected and the fold continues with the prior
//! schema. Bindings captured by successful layers are visible to the
//! layers after them.

use crate::driver::{merge_schema, MergeOptions, MergeOutcome};
use crate::environment::{Environment, EnvironmentOptions};
use crate::error::Diagnostic;
use crate::schema::Schema;
use crate::template::Template;
use indexmap::IndexMap;
use serde_json::Value;

/// Outcome of folding all layers.
#[derive(Debug)]
pub struct ProgressiveMatch {
    /// The successful fold of every applied layer.
    pub schema: Schema,
    /// Bindings captured across applied layers.
    pub values: IndexMap<String, Value>,
    /// Indices of layers that applied cleanly.
    pub applied: Vec<usize>,
    /// Diagnostics from rejected layers.
    pub rejected: Vec<(usize, Vec<Diagnostic>)>,
}

impl ProgressiveMatch {
    pub fn all_applied(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Environment overlay making earlier layers' captures visible.
struct LayeredEnvironment<'a> {
    base: &'a dyn Environment,
    captured: &'a IndexMap<String, Value>,
}

impl Environment for LayeredEnvironment<'_> {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn resolve(&self, identifier: &str) -> Option<Value> {
        if let Some(value) = self.captured.get(identifier) {
            return Some(value.clone());
        }
        // Dotted paths reach into captured structures.
        let root = crate::path_utils::root_segment(identifier);
        if let Some(value) = self.captured.get(root) {
            let rest = &identifier[root.len().min(identifier.len())..];
            let rest = rest.strip_prefix('.').unwrap_or(rest);
            if let Some(found) = crate::path_utils::lookup_path(value, rest) {
                return Some(found.clone());
            }
        }
        self.base.resolve(identifier)
    }

    fn options(&self) -> &EnvironmentOptions {
        self.base.options()
    }
}

/// Fold `layers` onto `base` under the given merge options.
pub fn apply_layers(
    options: MergeOptions,
    base: Schema,
    layers: &[Template],
    environment: &dyn Environment,
) -> ProgressiveMatch {
    let mut schema = base;
    let mut values: IndexMap<String, Value> = IndexMap::new();
    let mut applied = Vec::new();
    let mut rejected = Vec::new();

    for (index, layer) in layers.iter().enumerate() {
        let layered = LayeredEnvironment {
            base: environment,
            captured: &values,
        };
        let MergeOutcome {
            schema: merged,
            values: captured,
            diagnostics,
        } = merge_schema(options, &schema, layer, &layered);

        match merged {
            Some(next) => {
                tracing::debug!(layer = index, "layer applied");
                schema = next;
                for (name, value) in captured {
                    values.entry(name).or_insert(value);
                }
                applied.push(index);
            }
            None => {
                tracing::debug!(layer = index, failures = diagnostics.len(), "layer rejected");
                rejected.push((index, diagnostics));
            }
        }
    }

    ProgressiveMatch {
        schema,
        values,
        applied,
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::ScriptEnvironment;
    use serde_json::json;

    #[test]
    fn test_failing_layer_rolls_back() {
        let env = ScriptEnvironment::new();
        let layers = vec![
            Template::parse(r#"{a: "one"}"#).unwrap(),
            // Conflicts with the first layer's literal.
            Template::parse(r#"{a: "two"}"#).unwrap(),
            Template::parse(r#"{b: "three"}"#).unwrap(),
        ];
        let outcome = apply_layers(MergeOptions::merge(), Schema::Stub, &layers, &env);
        assert_eq!(outcome.applied, vec![0, 2]);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].0, 1);

        let rendered = crate::driver::render_schema(&outcome.schema, &env).unwrap();
        assert_eq!(rendered.value, json!({"a": "one", "b": "three"}));
    }

    #[test]
    fn test_captured_values_visible_to_later_layers() {
        let env = ScriptEnvironment::new();
        let layers = vec![
            Template::parse(r#"{token: "{{token}}"}"#).unwrap(),
            Template::parse(r#"{token: "abc", echo: "{{= token.toUpperCase()}}"}"#).unwrap(),
        ];
        let outcome = apply_layers(MergeOptions::match_build(), Schema::Stub, &layers, &env);
        assert!(outcome.all_applied());
        assert_eq!(outcome.values.get("token"), Some(&json!("abc")));
    }
}
