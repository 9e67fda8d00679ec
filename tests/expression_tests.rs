mod common;

use common::*;
use serde_json::json;

/// Expression-bound patterns evaluated through the scope graph.
#[test]
fn test_arithmetic_and_string_expressions() {
    let e = env(json!({"base": 4, "name": "pardon"}));
    let schema = build(
        r#"{
            doubled: "{{= base * 2}}",
            shout: "{{= name.toUpperCase()}}",
            padded: "{{= name.slice(0, 3).padStart(5, '.')}}"
        }"#,
        &e,
    );
    let rendered = render(&schema, &e);
    assert_eq!(rendered.value["doubled"], json!("8"));
    assert_eq!(rendered.value["shout"], json!("PARDON"));
    assert_eq!(rendered.value["padded"], json!("..par"));
}

#[test]
fn test_named_expression_binds_its_result() {
    let e = env(json!({"host": "api.example.com"}));
    let schema = build(
        r#"{bare: "{{-domain = host.replace('api.', '')}}", echo: "{{domain}}"}"#,
        &e,
    );
    let rendered = render(&schema, &e);
    assert_eq!(rendered.value["echo"], json!("example.com"));
    assert_eq!(rendered.values.get("domain"), Some(&json!("example.com")));
}

#[test]
fn test_ternary_and_comparison() {
    let e = env(json!({"count": 12}));
    let schema = build(r#"{size: "{{= count > 10 ? 'large' : 'small'}}"}"#, &e);
    let rendered = render(&schema, &e);
    assert_eq!(rendered.value["size"], json!("large"));
}

#[test]
fn test_expressions_chain_through_identifiers() {
    // a depends on b, b depends on a literal elsewhere; resolution is
    // lazy and order-independent.
    let e = env(json!({}));
    let schema = build(
        r#"{
            out: "{{= derived + '!'}}",
            mid: "{{-derived = source.toUpperCase()}}",
            src: "{{-source}}"
        }"#,
        &e,
    );
    let schema = merge(&schema, r#"{src: "ok"}"#, &e);
    let rendered = render(&schema, &e);
    assert_eq!(rendered.value["out"], json!("OK!"));
}

#[test]
fn test_expression_failure_surfaces() {
    let e = env(json!({"s": "text"}));
    let schema = build(r#"{bad: "{{= s.noSuchMethod()}}"}"#, &e);
    assert!(pardon_rs::driver::render_schema(&schema, &e).is_err());
}

#[test]
fn test_reference_chains_share_a_binding() {
    let e = env(json!({}));
    let schema = build(r#"{a: a = b, b: "{{-b}}"}"#, &e);
    let schema = merge(&schema, r#"{b: "shared"}"#, &e);
    let rendered = render(&schema, &e);
    assert_eq!(rendered.value, json!({"a": "shared", "b": "shared"}));
}
