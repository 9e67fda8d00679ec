mod common;

use common::*;
use pardon_rs::driver;
use pardon_rs::error::SchemaError;
use serde_json::json;

/// Chained expressions across layered templates: values flow from a
/// literal through an expression and back out through pattern captures.
#[test]
fn test_chained_expression_layers() {
    let e = env(json!({}));
    let schema = build(
        r#"{
            "world": "{{-globe}}",
            "hi": "{{-world = globe.toUpperCase()}}",
            "planet": "{{-world}}",
            "hello": "{{planet}}"
        }"#,
        &e,
    );
    let schema = merge(
        &schema,
        r#"{"world": "planet earth", "planet": "PLANET {{planet}}"}"#,
        &e,
    );

    let rendered = render(&schema, &e);
    assert_eq!(rendered.value["hello"], json!("EARTH"));
    assert_eq!(rendered.value["planet"], json!("PLANET EARTH"));
    assert_eq!(rendered.value["hi"], json!("PLANET EARTH"));
    assert_eq!(rendered.value["world"], json!("planet earth"));

    assert_eq!(rendered.values.get("planet"), Some(&json!("EARTH")));
    assert_eq!(rendered.values.get("globe"), Some(&json!("planet earth")));
}

/// An unresolved required slot raises `Undefined` at its location.
#[test]
fn test_required_unresolved_diagnostic() {
    let e = env(json!({}));
    let schema = build(r#"{x: "{{x}}"}"#, &e);
    let err = driver::render_schema(&schema, &e).unwrap_err();
    assert_eq!(err.loc, "|.x");
    assert!(matches!(err.error, SchemaError::Undefined { ref name } if name == "x"));
}

#[test]
fn test_preview_keeps_pattern_sources() {
    let e = env(json!({"known": "yes"}));
    let schema = build(r#"{a: "{{known}}", b: "hello {{name}}"}"#, &e);
    let previewed = driver::preview_schema(&schema, &e).unwrap();
    assert_eq!(previewed.value, json!({"a": "yes", "b": "hello {{name}}"}));
}

#[test]
fn test_prerender_omits_unresolved() {
    let e = env(json!({"known": "yes"}));
    let schema = build(r#"{a: "{{known}}", b: "hello {{name}}"}"#, &e);
    let prerendered = driver::prerender_schema(&schema, &e).unwrap();
    assert_eq!(prerendered.value, json!({"a": "yes"}));
}

#[test]
fn test_circular_definition_fails_and_never_hangs() {
    let e = env(json!({}));
    let schema = build(
        r#"{a: "{{a = b + 'x'}}", b: "{{b = a + 'y'}}"}"#,
        &e,
    );
    let err = driver::render_schema(&schema, &e).unwrap_err();
    assert!(matches!(err.error, SchemaError::CircularDefinition { .. }));
}

#[test]
fn test_secret_redaction_and_isolation() {
    let secret_env = env_no_secrets(json!({"token": "t0p-s3cret"}));
    let schema = build(r#"{auth: "Bearer {{@secret token}}"}"#, &secret_env);

    let rendered = render(&schema, &secret_env);
    // Output is masked with the pattern source.
    assert_eq!(rendered.value["auth"], json!("Bearer {{@secret token}}"));
    // And the value bag carries no secret-declared names.
    assert!(!rendered.values.contains_key("token"));

    // With secrets enabled the real value renders.
    let open_env = env(json!({"token": "t0p-s3cret"}));
    let rendered = render(&schema, &open_env);
    assert_eq!(rendered.value["auth"], json!("Bearer t0p-s3cret"));
    assert_eq!(rendered.values.get("token"), Some(&json!("t0p-s3cret")));
}

#[test]
fn test_hidden_renders_for_side_effects_only() {
    let e = env(json!({"seed": "s33d"}));
    let schema = build(
        r#"{probe: hidden("{{capture = seed.toUpperCase()}}"), out: "{{capture}}"}"#,
        &e,
    );
    let rendered = render(&schema, &e);
    assert_eq!(rendered.value, json!({"out": "S33D"}));
    assert_eq!(rendered.values.get("capture"), Some(&json!("S33D")));
}

#[test]
fn test_out_of_order_dependencies_settle() {
    // `first` depends on a binding only established by `second`.
    let e = env(json!({}));
    let schema = build(r#"{first: "{{late}}", second: "{{-late}}"}"#, &e);
    let schema = merge(&schema, r#"{second: "settled"}"#, &e);
    let rendered = render(&schema, &e);
    assert_eq!(
        rendered.value,
        json!({"first": "settled", "second": "settled"})
    );
}

#[test]
fn test_postrender_recomputes_redaction() {
    let e = env(json!({"token": "abc"}));
    let schema = build(r#"{auth: "Bearer {{@secret token}}"}"#, &e);
    let rendered = render(&schema, &e);
    assert_eq!(rendered.value["auth"], json!("Bearer abc"));

    let masked_env = env_no_secrets(json!({"token": "abc"}));
    let post = driver::postrender_schema(&schema, &masked_env).unwrap();
    assert_eq!(post.value["auth"], json!("Bearer {{@secret token}}"));
}

#[test]
fn test_number_and_boolean_conversion() {
    let e = env(json!({}));
    let schema = build(r#"{count: 12, flag: true}"#, &e);
    let rendered = render(&schema, &e);
    assert_eq!(rendered.value, json!({"count": 12, "flag": true}));
    assert!(rendered.value["count"].is_number());
    assert!(rendered.value["flag"].is_boolean());
}
