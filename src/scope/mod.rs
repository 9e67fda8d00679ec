//! Evaluation scopes: the tree of frames holding declarations, bindings,
//! and per-element subscopes.
//!
//! Scopes live in an arena indexed by [`ScopeId`]; `parent` is a
//! non-owning backreference. A scope is created when a subscope is first
//! needed and lives until the operation completes. Declarations are owned
//! by the scope that first declared them; later layers merge hints and
//! expressions in place.
//!
//! Aggregation: subscopes created per array element (or per keyed-list
//! entry) carry an index of `{type, key}`. Bindings inside them named
//! `name.@key` / `name.@value` / `name.prop` are reconstructed into a
//! parent-level map or list by [`ScopeArena::aggregate_value`].

use crate::error::SchemaError;
use crate::path_utils;
use crate::pattern::HintFlags;
use crate::values::{fuzzy_eq, scalar_string};
use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

/// Index of a scope within the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) usize);

impl ScopeId {
    pub const ROOT: ScopeId = ScopeId(0);
}

/// Whether a subscope corresponds to an object field or an array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeIndexType {
    Field,
    Element,
}

/// Position of a subscope within its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeIndex {
    pub index_type: ScopeIndexType,
    pub key: Option<String>,
}

/// The aggregation discipline of an aggregate declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateType {
    /// Positional list reconstructed from element subscopes.
    List,
    /// Single-valued map keyed by each element's `@key` binding.
    Keyed,
    /// Multi-valued map: duplicate keys append.
    MultiKeyed,
}

/// The registered knowledge of how to compute a named value.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    /// Scope path from the root at declaration time.
    pub path: Vec<String>,
    pub expression: Option<String>,
    pub hint: HintFlags,
    /// Present when this name aggregates bindings from subscopes.
    pub aggregate: Option<AggregateType>,
}

/// A concrete defined value for a name. Set once; later equal defines are
/// no-ops.
#[derive(Debug, Clone)]
pub struct ValueDefinition {
    pub name: String,
    pub value: Value,
    pub path: Vec<String>,
    pub hint: HintFlags,
}

/// Outcome of a `define` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Defined {
    /// First definition of the name.
    New,
    /// Redefinition with a fuzzy-equal value; stored value unchanged
    /// (possibly widened from string to the typed form).
    Matched,
    /// Redefinition with an unequal value; the store keeps the prior value
    /// until the caller decides to override.
    Conflict { prior: Value },
}

/// One frame in the scope tree.
#[derive(Debug, Default)]
pub struct EvaluationScope {
    pub parent: Option<ScopeId>,
    pub path: Vec<String>,
    pub index: Option<ScopeIndex>,
    pub declarations: IndexMap<String, Declaration>,
    pub values: IndexMap<String, ValueDefinition>,
    pub subscopes: IndexMap<String, ScopeId>,
    /// Names currently mid-render; re-entry is a circular definition.
    evaluating: IndexSet<String>,
    /// Memoized computations keyed by joined context keys.
    cache: AHashMap<String, Option<Value>>,
}

/// Arena of evaluation scopes for one engine operation.
#[derive(Debug)]
pub struct ScopeArena {
    scopes: Vec<EvaluationScope>,
}

impl Default for ScopeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeArena {
    /// Create an arena holding only the root scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![EvaluationScope::default()],
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId::ROOT
    }

    pub fn get(&self, id: ScopeId) -> &EvaluationScope {
        &self.scopes[id.0]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut EvaluationScope {
        &mut self.scopes[id.0]
    }

    /// Child scope by name; created on first use.
    pub fn subscope(&mut self, parent: ScopeId, name: &str, index: ScopeIndex) -> ScopeId {
        if let Some(existing) = self.scopes[parent.0].subscopes.get(name) {
            return *existing;
        }
        let mut path = self.scopes[parent.0].path.clone();
        path.push(name.to_string());
        let id = ScopeId(self.scopes.len());
        self.scopes.push(EvaluationScope {
            parent: Some(parent),
            path,
            index: Some(index),
            ..EvaluationScope::default()
        });
        self.scopes[parent.0].subscopes.insert(name.to_string(), id);
        id
    }

    /// Transplant a scope's path onto another root, creating the chain of
    /// subscopes as needed. Used when a declaration's parent chain has been
    /// replaced by a later layer.
    pub fn rescope(&mut self, from: ScopeId, to_root: ScopeId) -> ScopeId {
        let path = self.scopes[from.0].path.clone();
        let mut current = to_root;
        let base = self.scopes[to_root.0].path.len();
        for (depth, name) in path.iter().enumerate().skip(base) {
            let index = self
                .find_descendant(from, depth + 1)
                .and_then(|id| self.scopes[id.0].index.clone())
                .unwrap_or(ScopeIndex {
                    index_type: ScopeIndexType::Field,
                    key: Some(name.clone()),
                });
            current = self.subscope(current, name, index);
        }
        current
    }

    fn find_descendant(&self, leaf: ScopeId, depth: usize) -> Option<ScopeId> {
        let mut chain = vec![leaf];
        let mut cursor = leaf;
        while let Some(parent) = self.scopes[cursor.0].parent {
            chain.push(parent);
            cursor = parent;
        }
        chain.reverse();
        chain.get(depth).copied()
    }

    /// Register or merge a declaration in `scope`.
    ///
    /// Duplicate declarations with an equal expression are idempotent;
    /// unequal expressions are a [`SchemaError::RedeclaredIdentifier`].
    /// When `scope` is indexed (an aggregate element), a companion aggregate
    /// declaration is added on the parent under the name's root segment.
    pub fn declare(
        &mut self,
        scope: ScopeId,
        name: &str,
        expression: Option<&str>,
        hint: HintFlags,
    ) -> Result<(), SchemaError> {
        let path = self.scopes[scope.0].path.clone();
        let slot = self.scopes[scope.0]
            .declarations
            .entry(name.to_string())
            .or_insert_with(|| Declaration {
                name: name.to_string(),
                path,
                expression: None,
                hint: HintFlags::default(),
                aggregate: None,
            });

        slot.hint.merge(hint);
        match (&slot.expression, expression) {
            (None, Some(expr)) => slot.expression = Some(expr.to_string()),
            (Some(prior), Some(next)) if prior != next => {
                return Err(SchemaError::RedeclaredIdentifier {
                    name: name.to_string(),
                    prior: prior.clone(),
                    next: next.to_string(),
                });
            }
            _ => {}
        }

        // Aggregate element scopes surface the aggregation root on the
        // parent so exports and sibling layers can see it.
        if name.contains('.') {
            if let (Some(index), Some(parent)) = (
                self.scopes[scope.0].index.clone(),
                self.scopes[scope.0].parent,
            ) {
                if index.index_type == ScopeIndexType::Element {
                    let root = path_utils::root_segment(name).to_string();
                    self.declare_aggregate(parent, &root, AggregateType::List)?;
                }
            }
        }
        Ok(())
    }

    /// Register an aggregate declaration (or upgrade its type).
    pub fn declare_aggregate(
        &mut self,
        scope: ScopeId,
        name: &str,
        aggregate: AggregateType,
    ) -> Result<(), SchemaError> {
        let path = self.scopes[scope.0].path.clone();
        let slot = self.scopes[scope.0]
            .declarations
            .entry(name.to_string())
            .or_insert_with(|| Declaration {
                name: name.to_string(),
                path,
                expression: None,
                hint: HintFlags::default(),
                aggregate: None,
            });
        match (slot.aggregate, aggregate) {
            (None, next) => slot.aggregate = Some(next),
            (Some(AggregateType::List), next) => slot.aggregate = Some(next),
            _ => {}
        }
        Ok(())
    }

    /// Install a binding for `name` in the scope that declares it (or in
    /// `scope` itself when undeclared).
    ///
    /// Fuzzy-equal redefinitions are no-ops; the stored value widens from a
    /// string to the typed form when the redefinition is typed. Unequal
    /// redefinitions return [`Defined::Conflict`] and leave the prior value
    /// in place; the caller decides whether that is a diagnostic plus
    /// override (match mode) or a hard error.
    pub fn define(&mut self, scope: ScopeId, name: &str, value: Value) -> Defined {
        let target = self.declaring_scope(scope, name).unwrap_or(scope);
        let hint = self
            .lookup_declaration(scope, name)
            .map(|(_, decl)| decl.hint)
            .unwrap_or_default();
        let path = self.scopes[target.0].path.clone();

        if let Some(existing) = self.scopes[target.0].values.get_mut(name) {
            if fuzzy_eq(&existing.value, &value) {
                let widen = existing.value.is_string() && !value.is_string();
                if widen {
                    existing.value = value;
                }
                existing.hint.merge(hint);
                return Defined::Matched;
            }
            return Defined::Conflict {
                prior: existing.value.clone(),
            };
        }

        self.scopes[target.0].values.insert(
            name.to_string(),
            ValueDefinition {
                name: name.to_string(),
                value,
                path,
                hint,
            },
        );
        Defined::New
    }

    /// Replace a binding outright (match-mode override after a conflict).
    pub fn redefine(&mut self, scope: ScopeId, name: &str, value: Value) {
        let target = self.declaring_scope(scope, name).unwrap_or(scope);
        if let Some(existing) = self.scopes[target.0].values.get_mut(name) {
            existing.value = value;
        } else {
            let path = self.scopes[target.0].path.clone();
            self.scopes[target.0].values.insert(
                name.to_string(),
                ValueDefinition {
                    name: name.to_string(),
                    value,
                    path,
                    hint: HintFlags::default(),
                },
            );
        }
    }

    /// The nearest enclosing scope (including `scope`) that declares `name`.
    fn declaring_scope(&self, scope: ScopeId, name: &str) -> Option<ScopeId> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            if self.scopes[id.0].declarations.contains_key(name) {
                return Some(id);
            }
            cursor = self.scopes[id.0].parent;
        }
        None
    }

    /// First in-scope value binding for `name`, walking the parent chain.
    pub fn lookup_value(&self, scope: ScopeId, name: &str) -> Option<&ValueDefinition> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            if let Some(def) = self.scopes[id.0].values.get(name) {
                return Some(def);
            }
            cursor = self.scopes[id.0].parent;
        }
        None
    }

    /// Nearest declaration for `name`, walking the parent chain.
    pub fn lookup_declaration(&self, scope: ScopeId, name: &str) -> Option<(ScopeId, &Declaration)> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            if let Some(decl) = self.scopes[id.0].declarations.get(name) {
                return Some((id, decl));
            }
            cursor = self.scopes[id.0].parent;
        }
        None
    }

    /// Mark `name` as mid-render in the scope that declares it. Re-entry
    /// while still in flight is a circular definition; the render never
    /// hangs.
    pub fn begin_rendering(&mut self, scope: ScopeId, name: &str) -> Result<(), SchemaError> {
        let target = self.declaring_scope(scope, name).unwrap_or(scope);
        if !self.scopes[target.0].evaluating.insert(name.to_string()) {
            return Err(SchemaError::CircularDefinition {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn end_rendering(&mut self, scope: ScopeId, name: &str) {
        let target = self.declaring_scope(scope, name).unwrap_or(scope);
        self.scopes[target.0].evaluating.shift_remove(name);
    }

    /// Memoize a computation under the joined key path.
    pub fn cached(
        &mut self,
        scope: ScopeId,
        keys: &[String],
        body: impl FnOnce(&mut ScopeArena) -> Option<Value>,
    ) -> Option<Value> {
        let cache_key = keys.join(".");
        if let Some(hit) = self.scopes[scope.0].cache.get(&cache_key) {
            return hit.clone();
        }
        let computed = body(self);
        self.scopes[scope.0]
            .cache
            .insert(cache_key, computed.clone());
        computed
    }

    /// Flatten owned and descendant bindings into one map.
    ///
    /// Aggregate declarations are reconstructed from their subscopes;
    /// internal `.@key` / `.@value` bindings never appear directly.
    pub fn resolved_values(&self, options: ResolvedValuesOptions) -> IndexMap<String, Value> {
        let mut out = IndexMap::new();
        self.collect_values(ScopeId::ROOT, &options, &mut out);
        out
    }

    fn collect_values(
        &self,
        scope: ScopeId,
        options: &ResolvedValuesOptions,
        out: &mut IndexMap<String, Value>,
    ) {
        // Aggregates reconstructed at this level.
        let aggregate_names: Vec<(String, AggregateType)> = self.scopes[scope.0]
            .declarations
            .iter()
            .filter_map(|(name, decl)| decl.aggregate.map(|a| (name.clone(), a)))
            .collect();

        for (name, aggregate) in aggregate_names {
            if let Some(value) = self.aggregate_value(scope, &name, aggregate) {
                let hint = self
                    .lookup_declaration(scope, &name)
                    .map(|(_, d)| d.hint)
                    .unwrap_or_default();
                if self.keep_binding(&name, hint, options) {
                    out.entry(name).or_insert(value);
                }
            }
        }

        for (name, def) in &self.scopes[scope.0].values {
            if name.contains(".@") {
                continue; // aggregation internals
            }
            if !self.keep_binding(name, def.hint, options) {
                continue;
            }
            // Dotted bindings under an aggregate root are reconstructed
            // above; only surface them when no aggregate claims the root.
            if name.contains('.') {
                let root = path_utils::root_segment(name);
                if self
                    .lookup_declaration(scope, root)
                    .is_some_and(|(_, d)| d.aggregate.is_some())
                {
                    continue;
                }
            }
            out.entry(name.clone()).or_insert_with(|| def.value.clone());
        }

        for sub in self.scopes[scope.0].subscopes.values() {
            self.collect_values(*sub, options, out);
        }
    }

    fn keep_binding(&self, name: &str, hint: HintFlags, options: &ResolvedValuesOptions) -> bool {
        if hint.secret && !options.secrets {
            return false;
        }
        if options.exports_only && (hint.hidden || hint.noexport || !hint.export) {
            return false;
        }
        if options.declared_only && name.starts_with('$') {
            return false;
        }
        true
    }

    /// Reconstruct the aggregate value for `name` from the element
    /// subscopes of `scope`.
    ///
    /// Each element contributes either its `.@value` binding directly or an
    /// object of its `.prop` bindings; `.@key` names the entry (discarded
    /// from the entry body). Positional lists grow to the max index
    /// observed.
    pub fn aggregate_value(
        &self,
        scope: ScopeId,
        name: &str,
        aggregate: AggregateType,
    ) -> Option<Value> {
        let prefix = format!("{name}.");
        let mut keyed: IndexMap<String, Vec<Value>> = IndexMap::new();
        let mut positional: Vec<(usize, Value)> = Vec::new();
        let mut any = false;

        // Direct dotted bindings in the owning scope (spread captures).
        let mut own = Value::Object(serde_json::Map::new());
        let mut own_any = false;
        for (vname, vdef) in &self.scopes[scope.0].values {
            if let Some(suffix) = vname.strip_prefix(&prefix) {
                if !suffix.contains('@') {
                    path_utils::insert_path(&mut own, suffix, vdef.value.clone());
                    own_any = true;
                }
            }
        }

        for sub_id in self.scopes[scope.0].subscopes.values() {
            let sub = &self.scopes[sub_id.0];
            let Some(index) = &sub.index else { continue };
            if index.index_type != ScopeIndexType::Element {
                continue;
            }

            let mut key: Option<String> = index.key.clone();
            let mut direct: Option<Value> = None;
            let mut props = Value::Object(serde_json::Map::new());
            let mut contributed = false;

            for (vname, vdef) in &sub.values {
                let Some(suffix) = vname.strip_prefix(&prefix) else {
                    continue;
                };
                contributed = true;
                match suffix {
                    "@key" => key = scalar_string(&vdef.value),
                    "@value" => direct = Some(vdef.value.clone()),
                    prop => path_utils::insert_path(&mut props, prop, vdef.value.clone()),
                }
            }
            if !contributed {
                continue;
            }
            any = true;

            let entry = direct.unwrap_or(props);
            match aggregate {
                AggregateType::Keyed | AggregateType::MultiKeyed => {
                    let key = key.unwrap_or_default();
                    keyed.entry(key).or_default().push(entry);
                }
                AggregateType::List => {
                    // Elements keyed by position; non-numeric keys promote
                    // the aggregate to a keyed map.
                    match index.key.as_deref().and_then(|k| k.parse::<usize>().ok()) {
                        Some(position) => positional.push((position, entry)),
                        None => {
                            let key = key.unwrap_or_default();
                            keyed.entry(key).or_default().push(entry);
                        }
                    }
                }
            }
        }

        if !any {
            return own_any.then_some(own);
        }

        if !keyed.is_empty() {
            let mut map = serde_json::Map::new();
            for (key, mut entries) in keyed {
                match aggregate {
                    AggregateType::MultiKeyed => {
                        map.insert(key, Value::Array(entries));
                    }
                    _ => {
                        map.insert(key, entries.pop().unwrap_or(Value::Null));
                    }
                }
            }
            return Some(Value::Object(map));
        }

        positional.sort_by_key(|(position, _)| *position);
        let max = positional.last().map(|(position, _)| *position + 1)?;
        let mut list = vec![Value::Null; max];
        for (position, entry) in positional {
            list[position] = entry;
        }
        Some(Value::Array(list))
    }

    /// Total bindings across every scope; the render fixed point uses this
    /// as its progress measure.
    pub fn total_values(&self) -> usize {
        self.scopes.iter().map(|scope| scope.values.len()).sum()
    }
}

/// Filters for [`ScopeArena::resolved_values`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolvedValuesOptions {
    /// Include bindings whose declaration is marked `@secret`.
    pub secrets: bool,
    /// Only bindings marked `@export`.
    pub exports_only: bool,
    /// Skip engine-internal (`$`-prefixed) names.
    pub declared_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_define_idempotent() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        assert_eq!(arena.define(root, "x", json!(10)), Defined::New);
        assert_eq!(arena.define(root, "x", json!(10)), Defined::Matched);
        assert_eq!(arena.define(root, "x", json!("10")), Defined::Matched);
        assert_eq!(
            arena.define(root, "x", json!(30)),
            Defined::Conflict { prior: json!(10) }
        );
        assert_eq!(arena.lookup_value(root, "x").unwrap().value, json!(10));
    }

    #[test]
    fn test_define_widens_string() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        arena.define(root, "n", json!("10"));
        assert_eq!(arena.define(root, "n", json!(10)), Defined::Matched);
        assert_eq!(arena.lookup_value(root, "n").unwrap().value, json!(10));
    }

    #[test]
    fn test_declare_conflicting_expressions() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        arena.declare(root, "x", Some("(10)"), HintFlags::default()).unwrap();
        arena.declare(root, "x", Some("(10)"), HintFlags::default()).unwrap();
        assert!(matches!(
            arena.declare(root, "x", Some("(20)"), HintFlags::default()),
            Err(SchemaError::RedeclaredIdentifier { .. })
        ));
    }

    #[test]
    fn test_subscope_values_visible_from_children() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        arena.define(root, "outer", json!("o"));
        let sub = arena.subscope(
            root,
            "0",
            ScopeIndex {
                index_type: ScopeIndexType::Element,
                key: Some("0".into()),
            },
        );
        assert_eq!(arena.lookup_value(sub, "outer").unwrap().value, json!("o"));
        arena.define(sub, "inner", json!("i"));
        assert!(arena.lookup_value(root, "inner").is_none());
    }

    #[test]
    fn test_cycle_detection() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        arena.begin_rendering(root, "x").unwrap();
        assert!(matches!(
            arena.begin_rendering(root, "x"),
            Err(SchemaError::CircularDefinition { .. })
        ));
        arena.end_rendering(root, "x");
        arena.begin_rendering(root, "x").unwrap();
    }

    #[test]
    fn test_keyed_aggregate_roundtrip() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        arena
            .declare_aggregate(root, "map", AggregateType::Keyed)
            .unwrap();
        for (i, (k, v)) in [("x", "xx"), ("y", "yy")].iter().enumerate() {
            let sub = arena.subscope(
                root,
                &i.to_string(),
                ScopeIndex {
                    index_type: ScopeIndexType::Element,
                    key: Some(k.to_string()),
                },
            );
            arena.define(sub, "map.@key", json!(k));
            arena.define(sub, "map.@value", json!(v));
        }
        let values = arena.resolved_values(ResolvedValuesOptions::default());
        assert_eq!(values.get("map"), Some(&json!({"x": "xx", "y": "yy"})));
    }

    #[test]
    fn test_positional_aggregate_with_props() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        arena
            .declare_aggregate(root, "items", AggregateType::List)
            .unwrap();
        for i in 0..2 {
            let sub = arena.subscope(
                root,
                &i.to_string(),
                ScopeIndex {
                    index_type: ScopeIndexType::Element,
                    key: Some(i.to_string()),
                },
            );
            arena.define(sub, "items.id", json!(format!("id-{i}")));
            arena.define(sub, "items.qty", json!(i + 1));
        }
        let values = arena.resolved_values(ResolvedValuesOptions::default());
        assert_eq!(
            values.get("items"),
            Some(&json!([{"id": "id-0", "qty": 1}, {"id": "id-1", "qty": 2}]))
        );
    }

    #[test]
    fn test_secret_isolation() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        let mut secret = HintFlags::default();
        secret.secret = true;
        arena.declare(root, "token", None, secret).unwrap();
        arena.define(root, "token", json!("s3cr3t"));
        arena.define(root, "user", json!("u"));

        let public = arena.resolved_values(ResolvedValuesOptions::default());
        assert!(!public.contains_key("token"));
        assert!(public.contains_key("user"));

        let all = arena.resolved_values(ResolvedValuesOptions {
            secrets: true,
            ..Default::default()
        });
        assert!(all.contains_key("token"));
    }

    #[test]
    fn test_cached_memoizes_by_keys() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        let keys = vec!["body".to_string(), "id".to_string()];

        let first = arena.cached(root, &keys, |_| Some(json!("computed")));
        assert_eq!(first, Some(json!("computed")));

        // Second call must not re-run the body.
        let second = arena.cached(root, &keys, |_| panic!("body re-ran"));
        assert_eq!(second, Some(json!("computed")));

        // A different key path computes independently.
        let other = arena.cached(root, &["other".to_string()], |_| Some(json!(2)));
        assert_eq!(other, Some(json!(2)));
    }

    #[test]
    fn test_rescope() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        let a = arena.subscope(
            root,
            "items",
            ScopeIndex {
                index_type: ScopeIndexType::Field,
                key: Some("items".into()),
            },
        );
        let b = arena.subscope(
            a,
            "0",
            ScopeIndex {
                index_type: ScopeIndexType::Element,
                key: Some("0".into()),
            },
        );
        let transplanted = arena.rescope(b, root);
        assert_eq!(transplanted, b);
        assert_eq!(arena.get(transplanted).path, vec!["items", "0"]);
    }
}
