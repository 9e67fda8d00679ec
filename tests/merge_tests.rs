mod common;

use common::*;
use pardon_rs::error::SchemaError;
use serde_json::json;

/// Merge semantics: literal capture, conflicts, and the primitive
/// round-trip of values through match mode.
#[test]
fn test_primitive_round_trip() {
    let e = env(json!({}));
    let schema = build(
        r#"{string: "s", number: 1, boolean: true, "false": false, nil: null}"#,
        &e,
    );

    // The literals render as themselves.
    let rendered = render(&schema, &e);
    assert_eq!(
        rendered.value,
        json!({"string": "s", "number": 1, "boolean": true, "false": false, "nil": null})
    );

    // Matching the pattern form captures every value, typed.
    let patterns = build(
        r#"{string: "{{s}}", number: "{{n}}", boolean: "{{t}}", "false": "{{f}}", nil: "{{z}}"}"#,
        &e,
    );
    let matched = match_value(
        &patterns,
        json!({"string": "s", "number": 1, "boolean": true, "false": false, "nil": null}),
        &e,
    );
    assert!(matched.is_success(), "{:?}", matched.diagnostics);
    assert_eq!(matched.values.get("s"), Some(&json!("s")));
    assert_eq!(matched.values.get("n"), Some(&json!(1)));
    assert_eq!(matched.values.get("t"), Some(&json!(true)));
    assert_eq!(matched.values.get("f"), Some(&json!(false)));
    assert_eq!(matched.values.get("z"), Some(&json!(null)));
}

#[test]
fn test_literal_conflict_fails_merge() {
    let e = env(json!({}));
    let schema = build(r#"{a: "one"}"#, &e);
    let template = pardon_rs::template::Template::parse(r#"{a: "two"}"#).unwrap();
    let outcome = pardon_rs::driver::merge_schema(
        pardon_rs::driver::MergeOptions::merge(),
        &schema,
        &template,
        &e,
    );
    assert!(outcome.schema.is_none());
    assert!(outcome
        .diagnostics
        .iter()
        .any(|d| matches!(d.error, SchemaError::ExpectedValueMismatch { .. })));
}

#[test]
fn test_type_mismatch_diagnostic() {
    let e = env(json!({}));
    let schema = build(r#"{a: "text"}"#, &e);
    let outcome = match_value(&schema, json!({"a": [1, 2]}), &e);
    assert!(outcome.schema.is_none());
    assert!(outcome
        .diagnostics
        .iter()
        .any(|d| matches!(d.error, SchemaError::TypeMismatch { .. })));
    // The diagnostic carries the key path.
    assert!(outcome.diagnostics.iter().any(|d| d.loc.contains(".a")));
}

#[test]
fn test_match_captures_into_nested_objects() {
    let e = env(json!({}));
    let schema = build(
        r#"{user: {id: "{{id}}", profile: {city: "{{city}}"}}}"#,
        &e,
    );
    let matched = match_value(
        &schema,
        json!({"user": {"id": "u-7", "profile": {"city": "NYC"}}}),
        &e,
    );
    assert!(matched.is_success(), "{:?}", matched.diagnostics);
    assert_eq!(matched.values.get("id"), Some(&json!("u-7")));
    assert_eq!(matched.values.get("city"), Some(&json!("NYC")));
}

#[test]
fn test_redefinition_conflict_in_match_mode() {
    // Template A binds x by expression; template B's later literal wins
    // with a diagnostic, and both x and y render as the literal.
    let e = env(json!({}));
    let schema = build(r#"{x: x = (10)}"#, &e);

    let template = pardon_rs::template::Template::parse(r#"{x: 30, y: x}"#).unwrap();
    let outcome = pardon_rs::driver::merge_schema(
        pardon_rs::driver::MergeOptions::match_build(),
        &schema,
        &template,
        &e,
    );
    let merged = outcome.schema.expect("match succeeds despite diagnostic");
    let redefined = outcome
        .diagnostics
        .iter()
        .find(|d| matches!(d.error, SchemaError::RedefinedIdentifier { .. }))
        .expect("redefinition diagnostic recorded");
    assert_eq!(
        redefined.error.to_string(),
        "redefined:x=30 :: previously defined as 10"
    );

    let rendered = render(&merged, &e);
    assert_eq!(rendered.value, json!({"x": 30, "y": 30}));
}

#[test]
fn test_pattern_merge_commutes_for_compatible_patterns() {
    let e = env(json!({"x": "1", "y": "1"}));

    let ab = {
        let schema = build(r#"{v: "a{{x}}b"}"#, &e);
        let schema = merge(&schema, r#"{v: "a{{y}}b"}"#, &e);
        render(&schema, &e).value
    };
    let ba = {
        let schema = build(r#"{v: "a{{y}}b"}"#, &e);
        let schema = merge(&schema, r#"{v: "a{{x}}b"}"#, &e);
        render(&schema, &e).value
    };
    assert_eq!(ab, ba);
    assert_eq!(ab, json!({"v": "a1b"}));
}

#[test]
fn test_optional_keys_merge_and_render() {
    let e = env(json!({}));
    let schema = build(r#"{required: "r", extra?: "{{?extra}}"}"#, &e);

    // The optional key is omitted when its value never resolves.
    let rendered = render(&schema, &e);
    assert_eq!(rendered.value, json!({"required": "r"}));

    // And matching an object without it succeeds.
    let matched = match_value(&schema, json!({"required": "r"}), &e);
    assert!(matched.is_success(), "{:?}", matched.diagnostics);
}

#[test]
fn test_render_match_round_trip() {
    let e = env(json!({"u": "ada"}));
    let schema = build(r#"{user: "{{u}}", count: 7}"#, &e);

    let rendered = render(&schema, &e);
    assert_eq!(rendered.value, json!({"user": "ada", "count": 7}));

    // Matching the render back validates and reproduces the value.
    let matched = match_validate(&schema, rendered.value.clone(), &e);
    assert!(matched.is_success(), "{:?}", matched.diagnostics);
    let again = render(matched.schema.as_ref().unwrap(), &e);
    assert_eq!(again.value, rendered.value);
}

#[test]
fn test_renders_are_deterministic() {
    let e = env(json!({"host": "api.example.com", "id": "42"}));
    let schema = build(
        r#"{origin: "https://{{host}}", path: "/users/{{id}}", tag: "{{= host + ':' + id}}"}"#,
        &e,
    );
    let first = render(&schema, &e);
    let second = render(&schema, &e);
    assert_eq!(
        serde_json::to_string(&first.value).unwrap(),
        serde_json::to_string(&second.value).unwrap()
    );
}
