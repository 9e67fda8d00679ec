mod common;

use common::*;
use pardon_rs::error::SchemaError;
use serde_json::json;

/// Keyed list bidirectionality: a map input expands to a list of
/// elements, and matching that list reconstructs the map.
#[test]
fn test_keyed_list_renders_from_map() {
    let e = env(json!({"map": {"x": "xx", "y": "yy"}}));
    let schema = build(r#"{id: key} * [...{id: map.$key, a: map.$value}]"#, &e);
    let rendered = render(&schema, &e);
    assert_eq!(
        rendered.value,
        json!([{"id": "x", "a": "xx"}, {"id": "y", "a": "yy"}])
    );
}

#[test]
fn test_keyed_list_matches_back_to_map() {
    let e = env(json!({}));
    let schema = build(r#"{id: key} * [...{id: map.$key, a: map.$value}]"#, &e);
    let matched = match_value(
        &schema,
        json!([{"id": "x", "a": "xx"}, {"id": "y", "a": "yy"}]),
        &e,
    );
    assert!(matched.is_success(), "{:?}", matched.diagnostics);
    assert_eq!(
        matched.values.get("map"),
        Some(&json!({"x": "xx", "y": "yy"}))
    );
}

#[test]
fn test_duplicate_key_fails_single_valued() {
    let e = env(json!({}));
    let schema = build(r#"{id: key} * [...{id: map.$key, a: map.$value}]"#, &e);
    let matched = match_value(
        &schema,
        json!([{"id": "x", "a": "1"}, {"id": "x", "a": "2"}]),
        &e,
    );
    assert!(matched.schema.is_none());
    assert!(matched
        .diagnostics
        .iter()
        .any(|d| matches!(d.error, SchemaError::DuplicateKey { ref key } if key == "x")));
}

#[test]
fn test_multivalued_keyed_list_appends() {
    let e = env(json!({}));
    let schema = build(r#"{name: key} ** [...{name: h.$key, value: h.$value}]"#, &e);
    let matched = match_value(
        &schema,
        json!([
            {"name": "accept", "value": "text/plain"},
            {"name": "cookie", "value": "a=1"},
            {"name": "cookie", "value": "b=2"}
        ]),
        &e,
    );
    assert!(matched.is_success(), "{:?}", matched.diagnostics);
    assert_eq!(
        matched.values.get("h"),
        Some(&json!({
            "accept": ["text/plain"],
            "cookie": ["a=1", "b=2"]
        }))
    );
}

#[test]
fn test_multivalued_keyed_list_renders_from_map() {
    let e = env(json!({"h": {"accept": ["text/plain"], "cookie": ["a=1", "b=2"]}}));
    let schema = build(r#"{name: key} ** [...{name: h.$key, value: h.$value}]"#, &e);
    let rendered = render(&schema, &e);
    assert_eq!(
        rendered.value,
        json!([
            {"name": "accept", "value": "text/plain"},
            {"name": "cookie", "value": "a=1"},
            {"name": "cookie", "value": "b=2"}
        ])
    );
}

/// Spread arrays aggregate positionally.
#[test]
fn test_array_spread_matches_to_list() {
    let e = env(json!({}));
    let schema = build(r#"[...{id: item.id, qty: item.qty}]"#, &e);
    let matched = match_value(
        &schema,
        json!([{"id": "a", "qty": 1}, {"id": "b", "qty": 2}]),
        &e,
    );
    assert!(matched.is_success(), "{:?}", matched.diagnostics);
    assert_eq!(
        matched.values.get("item"),
        Some(&json!([{"id": "a", "qty": 1}, {"id": "b", "qty": 2}]))
    );
}

#[test]
fn test_array_spread_renders_from_list() {
    let e = env(json!({"item": [{"id": "a", "qty": 1}, {"id": "b", "qty": 2}]}));
    let schema = build(r#"[...{id: item.id, qty: item.qty}]"#, &e);
    let rendered = render(&schema, &e);
    assert_eq!(
        rendered.value,
        json!([{"id": "a", "qty": 1}, {"id": "b", "qty": 2}])
    );
}

#[test]
fn test_tuple_positions_are_independent_scopes() {
    let e = env(json!({}));
    let schema = build(r#"[{v: "{{first}}"}, {v: "{{second}}"}]"#, &e);
    let matched = match_value(&schema, json!([{"v": "1"}, {"v": "2"}]), &e);
    assert!(matched.is_success(), "{:?}", matched.diagnostics);
    assert_eq!(matched.values.get("first"), Some(&json!("1")));
    assert_eq!(matched.values.get("second"), Some(&json!("2")));
}

#[test]
fn test_tuple_length_mismatch_fails_match() {
    let e = env(json!({}));
    let schema = build(r#"["a", "b"]"#, &e);
    let matched = match_value(&schema, json!(["a"]), &e);
    assert!(matched.schema.is_none());
}

/// Object spread captures unclaimed keys and re-renders them.
#[test]
fn test_object_spread_round_trip() {
    let e = env(json!({}));
    let schema = build(r#"{known: "{{k}}", ...rest}"#, &e);
    let matched = match_value(
        &schema,
        json!({"known": "v", "alpha": "1", "beta": "2"}),
        &e,
    );
    assert!(matched.is_success(), "{:?}", matched.diagnostics);
    assert_eq!(matched.values.get("k"), Some(&json!("v")));
    assert_eq!(
        matched.values.get("rest"),
        Some(&json!({"alpha": "1", "beta": "2"}))
    );

    // Rendering from the bag reproduces the spread keys.
    let replay = env(json!({"k": "v", "rest": {"alpha": "1", "beta": "2"}}));
    let rendered = render(&schema, &replay);
    assert_eq!(
        rendered.value,
        json!({"known": "v", "alpha": "1", "beta": "2"})
    );
}
