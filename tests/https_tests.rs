mod common;

use common::*;
use pardon_rs::https::{HttpsEngine, HttpsRequest, HttpsResponse};
use serde_json::json;

fn engine() -> HttpsEngine {
    let mut engine = HttpsEngine::new();
    engine
        .layer(
            r#"{
                method: "GET",
                origin: "https://{{host}}",
                pathname: "/api/users/{{id}}",
                headers: { authorization: "Bearer {{@secret token}}" }
            }"#,
        )
        .unwrap();
    engine
        .response_layer(r#"{status: 200, body: {user: {id: "{{userId}}", name: "{{name}}"}}}"#)
        .unwrap();
    engine
}

#[test]
fn test_resolve_request_from_ask() {
    let engine = engine();
    let ask = HttpsRequest {
        method: "GET".to_string(),
        url: "https://api.example.com/api/users/42".to_string(),
        headers: Vec::new(),
        body: None,
    };
    let e = env(json!({"token": "abc"}));

    let resolved = engine.resolve_request(&ask, &e).expect("request resolves");
    assert_eq!(resolved.request.method, "GET");
    assert_eq!(resolved.request.url, "https://api.example.com/api/users/42");
    assert!(resolved
        .request
        .headers
        .iter()
        .any(|(k, v)| k == "authorization" && v == "Bearer abc"));

    assert_eq!(resolved.rendered.values.get("id"), Some(&json!("42")));
    assert_eq!(
        resolved.rendered.values.get("host"),
        Some(&json!("api.example.com"))
    );
}

#[test]
fn test_resolve_request_completes_url_from_values() {
    // The ask only knows the path; origin comes from the endpoint
    // template plus the value bag.
    let engine = engine();
    let ask = HttpsRequest {
        method: "GET".to_string(),
        url: "https://api.example.com/api/users/7".to_string(),
        headers: vec![("accept".to_string(), "application/json".to_string())],
        body: None,
    };
    let e = env(json!({"token": "t"}));

    let resolved = engine.resolve_request(&ask, &e).expect("request resolves");
    // Unclaimed ask headers pass through the spread aggregation.
    assert!(resolved
        .request
        .headers
        .iter()
        .any(|(k, v)| k == "accept" && v == "application/json"));
    assert_eq!(resolved.rendered.values.get("id"), Some(&json!("7")));
}

#[test]
fn test_method_mismatch_rejects_ask() {
    let engine = engine();
    let ask = HttpsRequest {
        method: "DELETE".to_string(),
        url: "https://api.example.com/api/users/42".to_string(),
        headers: Vec::new(),
        body: None,
    };
    let e = env(json!({"token": "abc"}));
    assert!(engine.resolve_request(&ask, &e).is_err());
}

#[test]
fn test_match_response_extracts_values() {
    let engine = engine();
    let response = HttpsResponse {
        status: 200,
        headers: vec![(
            "content-type".to_string(),
            "application/json; charset=utf-8".to_string(),
        )],
        body: Some(r#"{"user":{"id":"u-1","name":"Ada"}}"#.to_string()),
    };
    let e = env(json!({}));

    let matched = engine
        .match_response(&response, &e)
        .expect("response matches");
    assert_eq!(matched.values.get("userId"), Some(&json!("u-1")));
    assert_eq!(matched.values.get("name"), Some(&json!("Ada")));
    assert_eq!(matched.values.get("status"), Some(&json!(200)));
}

#[test]
fn test_match_response_wrong_status_fails() {
    let engine = engine();
    let response = HttpsResponse {
        status: 404,
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: Some(r#"{"error":"not found"}"#.to_string()),
    };
    let e = env(json!({}));
    assert!(engine.match_response(&response, &e).is_err());
}

#[test]
fn test_form_body_sensed_from_content_type() {
    let mut engine = HttpsEngine::new();
    engine
        .layer(
            r#"{
                method: "POST",
                origin: "https://{{host}}",
                pathname: "/login",
                body: { user: "{{user}}", pass: "{{@secret pass}}" }
            }"#,
        )
        .unwrap();

    let ask = HttpsRequest {
        method: "POST".to_string(),
        url: "https://auth.example.com/login".to_string(),
        headers: vec![(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        )],
        body: Some("user=ada&pass=pw".to_string()),
    };
    let e = env(json!({}));

    let resolved = engine.resolve_request(&ask, &e).expect("request resolves");
    assert_eq!(resolved.rendered.values.get("user"), Some(&json!("ada")));
    assert_eq!(resolved.request.body.as_deref(), Some("user=ada&pass=pw"));
}

#[test]
fn test_search_params_round_trip() {
    let mut engine = HttpsEngine::new();
    engine
        .layer(
            r#"{
                method: "GET",
                origin: "https://{{host}}",
                pathname: "/search",
                searchParams: { q: "{{query}}" }
            }"#,
        )
        .unwrap();

    let ask = HttpsRequest {
        method: "GET".to_string(),
        url: "https://api.example.com/search?q=rust&debug=1".to_string(),
        headers: Vec::new(),
        body: None,
    };
    let e = env(json!({}));

    let resolved = engine.resolve_request(&ask, &e).expect("request resolves");
    assert_eq!(resolved.rendered.values.get("query"), Some(&json!("rust")));
    assert!(resolved.request.url.contains("q=rust"));
    assert!(resolved.request.url.contains("debug=1"));
}
