//! The per-visit walk context: mode, phase, scope cursor, diagnostics.

use crate::environment::Environment;
use crate::error::{format_loc, Diagnostic, SchemaError};
use crate::scope::{ScopeArena, ScopeId, ScopeIndex};

/// What the current walk is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Layer a template onto a schema.
    Merge,
    /// Layer an observed value onto a schema, capturing bindings.
    Match,
    /// Produce the concrete value; unresolved required slots are errors.
    Render,
    /// Best-effort render; unresolved slots keep their pattern source.
    Preview,
    /// Lenient render; unresolved slots are omitted.
    Prerender,
    /// Second-pass render over an already-rendered tree.
    Postrender,
}

impl Mode {
    /// Merge-flavored modes record conflicts as diagnostics instead of
    /// hard errors.
    pub fn is_merging(&self) -> bool {
        matches!(self, Mode::Merge | Mode::Match)
    }

    /// Lenient render modes degrade unresolved slots instead of failing.
    pub fn is_lenient(&self) -> bool {
        matches!(self, Mode::Preview | Mode::Prerender | Mode::Postrender)
    }
}

/// Build populates the schema; validate checks completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Build,
    Validate,
}

/// Per-walk cursor over the scope tree. Cheap to fork, owned by the driver.
pub struct Context<'e> {
    pub mode: Mode,
    pub phase: Phase,
    pub environment: &'e dyn Environment,
    pub arena: ScopeArena,
    pub scope: ScopeId,
    /// Key segments since the last scope boundary, for diagnostics.
    pub keys: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    /// Set during the last render pass: unresolved slots either degrade
    /// (lenient modes) or raise (strict render).
    pub finalizing: bool,
}

/// Saved cursor state across a scope boundary.
pub struct ContextFrame {
    scope: ScopeId,
    keys: Vec<String>,
}

impl<'e> Context<'e> {
    pub fn new(mode: Mode, phase: Phase, environment: &'e dyn Environment) -> Self {
        let arena = ScopeArena::new();
        let scope = arena.root();
        Self {
            mode,
            phase,
            environment,
            arena,
            scope,
            keys: Vec::new(),
            diagnostics: Vec::new(),
            finalizing: false,
        }
    }

    /// Current diagnostic location.
    pub fn loc(&self, name: Option<&str>) -> String {
        format_loc(name, &self.arena.get(self.scope).path, &self.keys)
    }

    /// Record a merge diagnostic at the current location.
    pub fn diagnose(&mut self, error: SchemaError) {
        let loc = self.loc(None);
        tracing::debug!(loc = %loc, error = %error, "merge diagnostic");
        self.diagnostics.push(Diagnostic::new(loc, error));
    }

    pub fn push_key(&mut self, key: &str) {
        self.keys.push(key.to_string());
    }

    pub fn pop_key(&mut self) {
        self.keys.pop();
    }

    /// Enter a subscope named `name`; restore with [`Context::restore`].
    pub fn enter_subscope(&mut self, name: &str, index: ScopeIndex) -> ContextFrame {
        let frame = ContextFrame {
            scope: self.scope,
            keys: std::mem::take(&mut self.keys),
        };
        self.scope = self.arena.subscope(self.scope, name, index);
        frame
    }

    pub fn restore(&mut self, frame: ContextFrame) {
        self.scope = frame.scope;
        self.keys = frame.keys;
    }
}
