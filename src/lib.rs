//! Pardon - HTTP request templating and matching engine
//!
//! Given a partial request plus a set of named values, the engine unifies
//! the ask against layered templates to derive a complete, fully-rendered
//! request, and matches responses against declared templates to extract
//! named values. The core is the schema engine:
//! - bidirectional unification (values flow template->output,
//!   output->values, and values->output)
//! - lazy, cycle-safe evaluation over a nested scope tree
//! - stackable encodings (json, base64, form, text) that round-trip
//! - a `{{...}}` pattern mini-language embedded in any string literal
//! - aggregation of per-element scopes into parent-level maps and lists

pub mod driver;
pub mod encoding;
pub mod environment;
pub mod error;
pub mod expr;
pub mod https;
pub mod matcher;
pub mod path_utils;
pub mod pattern;
pub mod schema;
pub mod scope;
pub mod template;
pub mod values;

// Re-export main types for convenience
pub use driver::{
    merge_schema, postrender_schema, prerender_schema, preview_schema, render_schema,
    MergeOptions, MergeOutcome, Rendered,
};
pub use encoding::EncodingKind;
pub use environment::{Environment, EnvironmentOptions, ScriptEnvironment};
pub use error::{Diagnostic, PatternError, SchemaError};
pub use https::{HttpsEngine, HttpsRequest, HttpsResponse};
pub use matcher::{apply_layers, ProgressiveMatch};
pub use pattern::{patternize, Pattern, PatternKind};
pub use schema::{Context, Mode, Phase, Schema};
pub use scope::{EvaluationScope, ScopeArena, ScopeId};
pub use template::Template;
