//! Expression mini-language for `{{var = expr}}` bindings.
//!
//! Expressions are short scripts embedded in patterns and references. They
//! are compiled once into a tagged expression tree and evaluated against a
//! binding callback; the callback may trigger lazy rendering of other
//! identifiers, which is how values flow across pattern boundaries.
//!
//! No runtime I/O: evaluation only touches the binding callback.

mod compiled;
mod evaluator;

pub use compiled::{BinaryOp, CompiledExpr, Conversion, UnaryOp};
pub use evaluator::{evaluate_expr, stringify, truthy, Binder, MapBinder};

use crate::error::ExprError;
use ahash::AHasher;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Global store for compiled expressions, keyed by source hash.
///
/// The same expression sources recur across every request built from a
/// collection; compile each once per process.
static EXPR_STORE: Lazy<DashMap<u64, Arc<CompiledExpr>>> = Lazy::new(DashMap::new);

/// Compile an expression source, consulting the global store first.
pub fn compile_expr(source: &str) -> Result<Arc<CompiledExpr>, ExprError> {
    let mut hasher = AHasher::default();
    source.hash(&mut hasher);
    let key = hasher.finish();

    if let Some(existing) = EXPR_STORE.get(&key) {
        return Ok(existing.clone());
    }

    let compiled = Arc::new(compiled::parse(source)?);
    EXPR_STORE.insert(key, compiled.clone());
    Ok(compiled)
}

/// The identifier paths an expression references, in source order.
pub fn referenced_idents(expr: &CompiledExpr) -> Vec<String> {
    let mut idents = Vec::new();
    collect_idents(expr, &mut idents);
    idents
}

fn collect_idents(expr: &CompiledExpr, out: &mut Vec<String>) {
    match expr {
        CompiledExpr::Ident(path) => {
            if !out.iter().any(|existing| existing == path) {
                out.push(path.clone());
            }
        }
        CompiledExpr::Unary(_, inner) => collect_idents(inner, out),
        CompiledExpr::Binary(_, a, b) => {
            collect_idents(a, out);
            collect_idents(b, out);
        }
        CompiledExpr::Ternary(c, t, e) => {
            collect_idents(c, out);
            collect_idents(t, out);
            collect_idents(e, out);
        }
        CompiledExpr::Method(target, _, args) => {
            collect_idents(target, out);
            for arg in args {
                collect_idents(arg, out);
            }
        }
        CompiledExpr::Convert(_, inner) => collect_idents(inner, out),
        _ => {}
    }
}
