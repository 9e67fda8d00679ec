#![allow(dead_code)]

use pardon_rs::driver::{self, MergeOptions, MergeOutcome, Rendered};
use pardon_rs::environment::{EnvironmentOptions, ScriptEnvironment};
use pardon_rs::schema::Schema;
use pardon_rs::template::Template;
use serde_json::Value;

/// Environment over an input value bag.
pub fn env(values: Value) -> ScriptEnvironment {
    ScriptEnvironment::new().with_values(values)
}

/// Environment with redaction active.
pub fn env_no_secrets(values: Value) -> ScriptEnvironment {
    ScriptEnvironment::new()
        .with_values(values)
        .with_options(EnvironmentOptions::new().with_secrets(false))
}

/// Merge template text onto a schema; panics on failure.
pub fn merge(schema: &Schema, template: &str, environment: &ScriptEnvironment) -> Schema {
    let template = Template::parse(template).expect("template parses");
    let outcome = driver::merge_schema(MergeOptions::merge(), schema, &template, environment);
    assert!(
        outcome.schema.is_some(),
        "merge failed: {:?}",
        outcome.diagnostics
    );
    outcome.schema.unwrap()
}

/// Build a schema from template text over a stub.
pub fn build(template: &str, environment: &ScriptEnvironment) -> Schema {
    merge(&Schema::Stub, template, environment)
}

/// Match an observed JSON value against a schema (build phase).
pub fn match_value(
    schema: &Schema,
    observed: Value,
    environment: &ScriptEnvironment,
) -> MergeOutcome {
    driver::merge_schema(
        MergeOptions::match_build(),
        schema,
        &Template::from_value(&observed),
        environment,
    )
}

/// Match an observed JSON value against a schema (validate phase).
pub fn match_validate(
    schema: &Schema,
    observed: Value,
    environment: &ScriptEnvironment,
) -> MergeOutcome {
    driver::merge_schema(
        MergeOptions::match_validate(),
        schema,
        &Template::from_value(&observed),
        environment,
    )
}

/// Render a schema; panics on failure.
pub fn render(schema: &Schema, environment: &ScriptEnvironment) -> Rendered {
    driver::render_schema(schema, environment).expect("render succeeds")
}
