use std::env;
use std::fs;
use std::process::ExitCode;
use std::time::Instant;

use pardon_rs::driver::{self, MergeOptions};
use pardon_rs::environment::{EnvironmentOptions, ScriptEnvironment};
use pardon_rs::schema::Schema;
use pardon_rs::template::Template;
use serde_json::Value;

const USAGE: &str = "usage:
  pardon-cli render <template> [values.json] [--pretty] [--no-secrets]
  pardon-cli preview <template> [values.json]
  pardon-cli match <template> <observed.json> [values.json]

  <template> is template text; <observed.json> / values.json are JSON files.";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let flags: Vec<&str> = args
        .iter()
        .filter(|a| a.starts_with("--"))
        .map(String::as_str)
        .collect();
    let positional: Vec<&str> = args
        .iter()
        .filter(|a| !a.starts_with("--"))
        .map(String::as_str)
        .collect();

    let Some((&command, rest)) = positional.split_first() else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    let result = match command {
        "render" | "preview" => run_render(command, rest, &flags),
        "match" => run_match(rest, &flags),
        other => {
            eprintln!("unknown command {other:?}\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn load_template(path: &str) -> Result<Template, String> {
    let text =
        fs::read_to_string(path).map_err(|e| format!("failed to read template {path}: {e}"))?;
    Template::parse(&text).map_err(|e| format!("failed to parse template {path}: {e}"))
}

fn load_values(path: Option<&str>) -> Result<Value, String> {
    let Some(path) = path else {
        return Ok(Value::Object(serde_json::Map::new()));
    };
    let text = fs::read_to_string(path).map_err(|e| format!("failed to read {path}: {e}"))?;
    serde_json::from_str(&text).map_err(|e| format!("failed to parse {path}: {e}"))
}

fn build_env(values: Value, flags: &[&str]) -> ScriptEnvironment {
    let options = EnvironmentOptions::new()
        .with_pretty_print(flags.contains(&"--pretty"))
        .with_secrets(!flags.contains(&"--no-secrets"));
    ScriptEnvironment::named("cli")
        .with_values(values)
        .with_options(options)
}

fn print_values(values: &indexmap::IndexMap<String, Value>) {
    if values.is_empty() {
        return;
    }
    println!("values:");
    for (name, value) in values {
        println!("  {name} = {value}");
    }
}

fn run_render(command: &str, rest: &[&str], flags: &[&str]) -> Result<(), String> {
    let [template_path, values @ ..] = rest else {
        return Err(USAGE.to_string());
    };
    let template = load_template(template_path)?;
    let env = build_env(load_values(values.first().copied())?, flags);

    let started = Instant::now();
    let outcome = driver::merge_schema(MergeOptions::merge(), &Schema::Stub, &template, &env);
    let Some(schema) = outcome.schema else {
        let mut message = String::from("template did not merge:");
        for diagnostic in &outcome.diagnostics {
            message.push_str(&format!("\n  {diagnostic}"));
        }
        return Err(message);
    };

    let rendered = if command == "preview" {
        driver::preview_schema(&schema, &env)
    } else {
        driver::render_schema(&schema, &env)
    }
    .map_err(|d| format!("render failed: {d}"))?;
    let elapsed = started.elapsed();

    let output = serde_json::to_string_pretty(&rendered.value)
        .unwrap_or_else(|_| rendered.value.to_string());
    println!("{output}");
    print_values(&rendered.values);
    eprintln!("({command} took {elapsed:?})");
    Ok(())
}

fn run_match(rest: &[&str], flags: &[&str]) -> Result<(), String> {
    let [template_path, observed_path, values @ ..] = rest else {
        return Err(USAGE.to_string());
    };
    let template = load_template(template_path)?;
    let observed = load_values(Some(observed_path))?;
    let env = build_env(load_values(values.first().copied())?, flags);

    let started = Instant::now();
    let outcome = driver::merge_schema(MergeOptions::merge(), &Schema::Stub, &template, &env);
    let Some(schema) = outcome.schema else {
        return Err("template did not merge".to_string());
    };

    let matched = driver::merge_schema(
        MergeOptions::match_build(),
        &schema,
        &Template::from_value(&observed),
        &env,
    );
    let elapsed = started.elapsed();

    for diagnostic in &matched.diagnostics {
        eprintln!("diagnostic: {diagnostic}");
    }
    if matched.schema.is_none() {
        return Err("match failed".to_string());
    }
    print_values(&matched.values);
    eprintln!("(match took {elapsed:?})");
    Ok(())
}
