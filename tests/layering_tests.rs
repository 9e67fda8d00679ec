mod common;

use common::*;
use pardon_rs::driver::MergeOptions;
use pardon_rs::matcher::apply_layers;
use pardon_rs::schema::Schema;
use pardon_rs::template::Template;
use serde_json::json;

fn layers(sources: &[&str]) -> Vec<Template> {
    sources
        .iter()
        .map(|source| Template::parse(source).expect("layer parses"))
        .collect()
}

#[test]
fn test_layers_fold_in_order() {
    let e = env(json!({}));
    let folded = apply_layers(
        MergeOptions::merge(),
        Schema::Stub,
        &layers(&[
            r#"{origin: "https://{{host}}", pathname: "/v1/{{route}}"}"#,
            r#"{origin: "https://api.example.com"}"#,
            r#"{pathname: "/v1/orders"}"#,
        ]),
        &e,
    );
    assert!(folded.all_applied());
    assert_eq!(folded.values.get("host"), Some(&json!("api.example.com")));
    assert_eq!(folded.values.get("route"), Some(&json!("orders")));

    let rendered = render(&folded.schema, &e);
    assert_eq!(
        rendered.value,
        json!({"origin": "https://api.example.com", "pathname": "/v1/orders"})
    );
}

#[test]
fn test_rejected_layer_keeps_prior_schema() {
    let e = env(json!({}));
    let folded = apply_layers(
        MergeOptions::merge(),
        Schema::Stub,
        &layers(&[
            r#"{service: "orders"}"#,
            r#"{service: "payments"}"#,
            r#"{region: "{{region}}"}"#,
        ]),
        &e,
    );
    assert_eq!(folded.applied, vec![0, 2]);
    assert_eq!(folded.rejected.len(), 1);
    assert_eq!(folded.rejected[0].0, 1);
    assert!(!folded.rejected[0].1.is_empty());
}

#[test]
fn test_earlier_captures_flow_into_later_layers() {
    let e = env(json!({}));
    let folded = apply_layers(
        MergeOptions::match_build(),
        Schema::Stub,
        &layers(&[
            r#"{env: "prod"}"#,
            r#"{env: "{{env}}", url: "https://{{env}}.example.com"}"#,
        ]),
        &e,
    );
    assert!(folded.all_applied());
    assert_eq!(folded.values.get("env"), Some(&json!("prod")));

    let rendered = render(&folded.schema, &e);
    assert_eq!(rendered.value["url"], json!("https://prod.example.com"));
}

#[test]
fn test_mixin_style_layering_over_base() {
    // Service config, endpoint template, then mixin fold into one schema;
    // the ask matches last.
    let e = env(json!({"token": "tkn"}));
    let folded = apply_layers(
        MergeOptions::merge(),
        Schema::Stub,
        &layers(&[
            r#"{headers: {accept: "application/json"}}"#,
            r#"{method: "GET", pathname: "/users/{{id}}"}"#,
            r#"{headers: {authorization: "Bearer {{@secret token}}"}}"#,
        ]),
        &e,
    );
    assert!(folded.all_applied());

    let matched = match_value(
        &folded.schema,
        json!({"method": "GET", "pathname": "/users/9"}),
        &e,
    );
    assert!(matched.is_success(), "{:?}", matched.diagnostics);
    assert_eq!(matched.values.get("id"), Some(&json!("9")));

    let rendered = render(matched.schema.as_ref().unwrap(), &e);
    assert_eq!(
        rendered.value["headers"],
        json!({"accept": "application/json", "authorization": "Bearer tkn"})
    );
}
