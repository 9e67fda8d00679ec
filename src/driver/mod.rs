//! Top-level schema operations: merge, preview, render, postrender.
//!
//! The driver seeds a fresh scope arena per operation, runs the scope pass
//! and then the walk, and collects diagnostics. Rendering runs as a fixed
//! point: passes repeat while bindings make progress; a stalled pass is
//! finalized (leniently or strictly by mode).

use crate::environment::Environment;
use crate::error::Diagnostic;
use crate::schema::{
    context::{Context, Mode, Phase},
    merge_node, render_node, scope_node, Schema,
};
use crate::scope::ResolvedValuesOptions;
use crate::template::Template;
use indexmap::IndexMap;
use serde_json::Value;

/// Options for [`merge_schema`].
#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    pub mode: Mode,
    pub phase: Phase,
}

impl MergeOptions {
    pub fn merge() -> Self {
        Self {
            mode: Mode::Merge,
            phase: Phase::Build,
        }
    }

    pub fn match_build() -> Self {
        Self {
            mode: Mode::Match,
            phase: Phase::Build,
        }
    }

    pub fn match_validate() -> Self {
        Self {
            mode: Mode::Match,
            phase: Phase::Validate,
        }
    }
}

/// Result of a merge: the new schema on success, plus captured bindings
/// and any diagnostics recorded along the way.
#[derive(Debug)]
pub struct MergeOutcome {
    pub schema: Option<Schema>,
    pub values: IndexMap<String, Value>,
    pub diagnostics: Vec<Diagnostic>,
}

impl MergeOutcome {
    pub fn is_success(&self) -> bool {
        self.schema.is_some()
    }
}

/// Merge a template into a schema under the given mode and phase.
pub fn merge_schema(
    options: MergeOptions,
    schema: &Schema,
    template: &Template,
    environment: &dyn Environment,
) -> MergeOutcome {
    let mut ctx = Context::new(options.mode, options.phase, environment);
    tracing::debug!(
        mode = ?options.mode,
        phase = ?options.phase,
        environment = environment.name(),
        "merge_schema"
    );

    scope_node(&mut ctx, schema);
    let merged = merge_node(&mut ctx, schema, template);

    let values = ctx.arena.resolved_values(ResolvedValuesOptions {
        secrets: environment.options().secrets,
        ..ResolvedValuesOptions::default()
    });
    MergeOutcome {
        schema: merged.ok(),
        values,
        diagnostics: ctx.diagnostics,
    }
}

/// A completed render: the output value plus the resolved value bag.
#[derive(Debug)]
pub struct Rendered {
    pub value: Value,
    pub values: IndexMap<String, Value>,
}

/// Full render; unresolved required slots are errors.
pub fn render_schema(
    schema: &Schema,
    environment: &dyn Environment,
) -> Result<Rendered, Diagnostic> {
    render_with_mode(Mode::Render, schema, environment)
}

/// Best-effort render; unresolved slots keep their pattern sources.
pub fn preview_schema(
    schema: &Schema,
    environment: &dyn Environment,
) -> Result<Rendered, Diagnostic> {
    render_with_mode(Mode::Preview, schema, environment)
}

/// Lenient render that omits unresolved slots.
pub fn prerender_schema(
    schema: &Schema,
    environment: &dyn Environment,
) -> Result<Rendered, Diagnostic> {
    render_with_mode(Mode::Prerender, schema, environment)
}

/// Second-pass render over an already-rendered tree, recomputing
/// redactions and applying late bindings.
pub fn postrender_schema(
    schema: &Schema,
    environment: &dyn Environment,
) -> Result<Rendered, Diagnostic> {
    render_with_mode(Mode::Postrender, schema, environment)
}

fn render_with_mode(
    mode: Mode,
    schema: &Schema,
    environment: &dyn Environment,
) -> Result<Rendered, Diagnostic> {
    let mut ctx = Context::new(mode, Phase::Build, environment);
    tracing::debug!(mode = ?mode, environment = environment.name(), "render_schema");

    scope_node(&mut ctx, schema);

    loop {
        let before = ctx.arena.total_values();
        match render_node(&mut ctx, schema) {
            Ok(Some(value)) => return Ok(finish(ctx, value)),
            Ok(None) => {
                if ctx.arena.total_values() > before {
                    continue; // progress; go around again
                }
                // Quiescent with work remaining: one finalizing pass
                // resolves, degrades, or raises each open slot.
                ctx.finalizing = true;
                match render_node(&mut ctx, schema) {
                    Ok(value) => return Ok(finish(ctx, value.unwrap_or(Value::Null))),
                    Err(error) => {
                        let loc = ctx.loc(None);
                        return Err(Diagnostic::new(loc, error));
                    }
                }
            }
            Err(error) => {
                let loc = ctx.loc(None);
                return Err(Diagnostic::new(loc, error));
            }
        }
    }
}

fn finish(ctx: Context<'_>, value: Value) -> Rendered {
    let values = ctx.arena.resolved_values(ResolvedValuesOptions {
        secrets: ctx.environment.options().secrets,
        ..ResolvedValuesOptions::default()
    });
    Rendered { value, values }
}
