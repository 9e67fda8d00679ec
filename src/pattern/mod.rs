//! The `{{...}}` pattern mini-language.
//!
//! A pattern is a string template split into alternating literal and
//! variable parts. Each variable carries a parameter name (possibly dotted,
//! possibly `$key`/`$value` suffixed), a hint flag set, an optional bound
//! expression, and a regex fragment used when the pattern is compiled out
//! for matching.
//!
//! ```text
//! {{name}}            declare + bind 'name'
//! {{?name}}           optional
//! {{!name}}           required
//! {{-name}}           hidden (no export)
//! {{@secret name}}    secret
//! {{name = expr}}     expression-bound
//! {{= expr}}          anonymous expression
//! ```
//!
//! Hint letters combine by adjacency (`{{?-name}}`). Compiled match regexes
//! are interned in a global store so identical sources compile once per
//! process.

mod store;

pub use store::compiled_regex;

use crate::error::PatternError;
use indexmap::IndexMap;

/// Flag set parsed from a variable's hint prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HintFlags {
    pub optional: bool,
    pub required: bool,
    pub hidden: bool,
    pub secret: bool,
    pub export: bool,
    pub noexport: bool,
    pub flow: bool,
    pub nonempty: bool,
}

impl HintFlags {
    /// Union two hint sets (layer merges combine hints in place).
    pub fn merge(&mut self, other: HintFlags) {
        self.optional |= other.optional;
        self.required |= other.required;
        self.hidden |= other.hidden;
        self.secret |= other.secret;
        self.export |= other.export;
        self.noexport |= other.noexport;
        self.flow |= other.flow;
        self.nonempty |= other.nonempty;
    }

    pub fn is_empty(&self) -> bool {
        *self == HintFlags::default()
    }
}

/// One variable inside a pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternVar {
    /// The bound parameter name; empty for `{{= expr}}` forms.
    pub param: String,
    pub hint: HintFlags,
    /// Expression source from `{{var = expr}}`.
    pub expr: Option<String>,
    /// Regex fragment this variable matches as; from the builder.
    pub re: String,
    /// The original `{{...}}` block text.
    pub source: String,
}

/// Alternating literal / variable parts of a pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternPart {
    Literal(String),
    /// Index into [`Pattern::vars`].
    Var(usize),
}

/// Classification of a parsed pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// No variables.
    Literal,
    /// A single variable covering the entire source.
    Trivial,
    /// Exactly one variable surrounded by literal text.
    Simple,
    /// At least one variable carries an expression.
    Expressive,
    /// Multiple variables; matched via the compiled-out regex form.
    Regex,
}

/// A parsed template string. Immutable after parse.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub source: String,
    pub parts: Vec<PatternPart>,
    pub vars: Vec<PatternVar>,
}

/// Supplies default regex fragments while parsing.
///
/// The default rule is `.+` for `@nonempty` variables and `.*` otherwise;
/// domain schemas (origin, pathname) narrow this per parameter.
pub struct PatternBuilding<'a> {
    pub re: &'a dyn Fn(&str, &HintFlags) -> Option<String>,
}

impl Default for PatternBuilding<'_> {
    fn default() -> Self {
        PatternBuilding { re: &|_, _| None }
    }
}

fn default_re(hint: &HintFlags) -> String {
    if hint.nonempty {
        ".+".to_string()
    } else {
        ".*".to_string()
    }
}

/// Parse a source string into a [`Pattern`].
pub fn patternize(source: &str, building: &PatternBuilding<'_>) -> Result<Pattern, PatternError> {
    let mut parts = Vec::new();
    let mut vars = Vec::new();
    let mut literal = String::new();
    let mut rest = source;

    while let Some(open) = rest.find("{{") {
        let Some(close_rel) = rest[open + 2..].find("}}") else {
            return Err(PatternError::InvalidPattern {
                source_text: source.to_string(),
                reason: "unterminated {{".to_string(),
            });
        };
        literal.push_str(&rest[..open]);
        if !literal.is_empty() {
            parts.push(PatternPart::Literal(std::mem::take(&mut literal)));
        }

        let block = &rest[open + 2..open + 2 + close_rel];
        let var = parse_var(source, block, building)?;
        parts.push(PatternPart::Var(vars.len()));
        vars.push(var);

        rest = &rest[open + 2 + close_rel + 2..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(PatternPart::Literal(literal));
    }

    Ok(Pattern {
        source: source.to_string(),
        parts,
        vars,
    })
}

/// Parse the interior of one `{{...}}` block.
fn parse_var(
    source: &str,
    block: &str,
    building: &PatternBuilding<'_>,
) -> Result<PatternVar, PatternError> {
    let mut hint = HintFlags::default();
    let mut body = block.trim();

    // Leading adjacency hints and @word flags.
    loop {
        if let Some(stripped) = body.strip_prefix('?') {
            hint.optional = true;
            body = stripped.trim_start();
        } else if let Some(stripped) = body.strip_prefix('!') {
            hint.required = true;
            body = stripped.trim_start();
        } else if let Some(stripped) = body.strip_prefix('-') {
            hint.hidden = true;
            body = stripped.trim_start();
        } else if let Some(stripped) = body.strip_prefix('@') {
            let end = stripped
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(stripped.len());
            let word = &stripped[..end];
            match word {
                "secret" => hint.secret = true,
                "export" => hint.export = true,
                "noexport" => hint.noexport = true,
                "flow" => hint.flow = true,
                "nonempty" => hint.nonempty = true,
                other => {
                    return Err(PatternError::InvalidPattern {
                        source_text: source.to_string(),
                        reason: format!("unknown hint @{other}"),
                    })
                }
            }
            body = stripped[end..].trim_start();
        } else {
            break;
        }
    }

    // `= expr` with no name, `name = expr`, or bare name.
    let (param, expr) = if let Some(stripped) = body.strip_prefix('=') {
        (String::new(), Some(stripped.trim().to_string()))
    } else if let Some(eq) = body.find('=') {
        let param = body[..eq].trim().to_string();
        let expr = body[eq + 1..].trim().to_string();
        if expr.is_empty() {
            return Err(PatternError::InvalidPattern {
                source_text: source.to_string(),
                reason: "empty expression".to_string(),
            });
        }
        (param, Some(expr))
    } else {
        (body.trim().to_string(), None)
    };

    if !param.is_empty() && !valid_param(&param) {
        return Err(PatternError::InvalidPattern {
            source_text: source.to_string(),
            reason: format!("malformed parameter {param:?}"),
        });
    }

    let re = (building.re)(&param, &hint).unwrap_or_else(|| default_re(&hint));

    Ok(PatternVar {
        param,
        hint,
        expr,
        re,
        source: format!("{{{{{block}}}}}"),
    })
}

fn valid_param(param: &str) -> bool {
    param.split('.').all(|seg| {
        !seg.is_empty()
            && seg
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    })
}

impl Pattern {
    /// Parse with default regex fragments only.
    pub fn parse(source: &str) -> Result<Pattern, PatternError> {
        patternize(source, &PatternBuilding::default())
    }

    pub fn kind(&self) -> PatternKind {
        if self.vars.is_empty() {
            return PatternKind::Literal;
        }
        if self.vars.iter().any(|v| v.expr.is_some()) {
            return PatternKind::Expressive;
        }
        if self.vars.len() == 1 {
            if self.parts.len() == 1 {
                return PatternKind::Trivial;
            }
            return PatternKind::Simple;
        }
        PatternKind::Regex
    }

    pub fn is_literal(&self) -> bool {
        self.kind() == PatternKind::Literal
    }

    pub fn is_trivial(&self) -> bool {
        self.kind() == PatternKind::Trivial
    }

    pub fn is_expressive(&self) -> bool {
        self.kind() == PatternKind::Expressive
    }

    /// All parameter names, in source order.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|v| v.param.as_str()).filter(|p| !p.is_empty())
    }

    /// True when any variable is marked secret.
    pub fn is_secret(&self) -> bool {
        self.vars.iter().any(|v| v.hint.secret)
    }

    /// True when every variable is optional.
    pub fn all_optional(&self) -> bool {
        !self.vars.is_empty() && self.vars.iter().all(|v| v.hint.optional)
    }

    /// True when any variable is required.
    pub fn any_required(&self) -> bool {
        self.vars.iter().any(|v| v.hint.required)
    }

    /// The anchored regex source for the compiled-out match form.
    /// `(?s)` so variables can capture across newlines in matched bodies.
    pub fn regex_source(&self) -> String {
        let mut out = String::from("(?s)^");
        for part in &self.parts {
            match part {
                PatternPart::Literal(text) => out.push_str(&regex::escape(text)),
                PatternPart::Var(i) => {
                    out.push('(');
                    out.push_str(&self.vars[*i].re);
                    out.push(')');
                }
            }
        }
        out.push('$');
        out
    }

    /// Two patterns are equivalent when their shapes and parameters agree;
    /// hints are unioned by the caller, not compared here.
    pub fn equivalent(&self, other: &Pattern) -> bool {
        if self.parts.len() != other.parts.len() || self.vars.len() != other.vars.len() {
            return false;
        }
        for (a, b) in self.parts.iter().zip(other.parts.iter()) {
            match (a, b) {
                (PatternPart::Literal(x), PatternPart::Literal(y)) if x == y => {}
                (PatternPart::Var(i), PatternPart::Var(j)) => {
                    let (va, vb) = (&self.vars[*i], &other.vars[*j]);
                    if va.param != vb.param || va.expr != vb.expr {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }
}

/// Match `input` against `pattern`, returning `param -> captured` text.
///
/// A parameter captured by more than one variable must capture equal text.
pub fn pattern_match(pattern: &Pattern, input: &str) -> Option<IndexMap<String, String>> {
    if pattern.vars.is_empty() {
        return (pattern.source == input).then(IndexMap::new);
    }

    let re = compiled_regex(&pattern.regex_source()).ok()?;
    let caps = re.captures(input)?;

    let mut out: IndexMap<String, String> = IndexMap::new();
    for (i, var) in pattern.vars.iter().enumerate() {
        let captured = caps.get(i + 1)?.as_str().to_string();
        if var.param.is_empty() {
            continue;
        }
        match out.get(&var.param) {
            Some(existing) if *existing != captured => return None,
            _ => {
                out.insert(var.param.clone(), captured);
            }
        }
    }
    Some(out)
}

/// Substitute values back into the template. `args` is positional per var.
pub fn pattern_render(pattern: &Pattern, args: &[String]) -> String {
    let mut out = String::new();
    for part in &pattern.parts {
        match part {
            PatternPart::Literal(text) => out.push_str(text),
            PatternPart::Var(i) => {
                if let Some(arg) = args.get(*i) {
                    out.push_str(arg);
                }
            }
        }
    }
    out
}

/// Substitute the known parameters, leaving unknown variables as their
/// original `{{...}}` blocks. Used by preview and pattern narrowing.
pub fn pattern_render_partial(pattern: &Pattern, known: &IndexMap<String, String>) -> String {
    let mut out = String::new();
    for part in &pattern.parts {
        match part {
            PatternPart::Literal(text) => out.push_str(text),
            PatternPart::Var(i) => {
                let var = &pattern.vars[*i];
                match known.get(&var.param) {
                    Some(value) if !var.param.is_empty() => out.push_str(value),
                    _ => out.push_str(&var.source),
                }
            }
        }
    }
    out
}

/// Compatibility test between two patterns.
///
/// Compatible when: both literal and equal; either side is trivial (a bare
/// variable unifies with anything); or their literal trivia agree position
/// by position (`a{{x}}b` vs `a{{y}}b`).
pub fn patterns_match(p: &Pattern, q: &Pattern) -> bool {
    match (p.kind(), q.kind()) {
        (PatternKind::Literal, PatternKind::Literal) => p.source == q.source,
        (PatternKind::Trivial, _) | (_, PatternKind::Trivial) => true,
        (PatternKind::Literal, _) => pattern_match(q, &p.source).is_some(),
        (_, PatternKind::Literal) => pattern_match(p, &q.source).is_some(),
        _ => trivia(p) == trivia(q),
    }
}

/// The literal fragments of a pattern, in order, with variables elided.
fn trivia(p: &Pattern) -> Vec<&str> {
    p.parts
        .iter()
        .filter_map(|part| match part {
            PatternPart::Literal(text) => Some(text.as_str()),
            PatternPart::Var(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern() {
        let p = Pattern::parse("hello world").unwrap();
        assert_eq!(p.kind(), PatternKind::Literal);
        assert!(pattern_match(&p, "hello world").is_some());
        assert!(pattern_match(&p, "hello").is_none());
    }

    #[test]
    fn test_trivial_pattern() {
        let p = Pattern::parse("{{name}}").unwrap();
        assert_eq!(p.kind(), PatternKind::Trivial);
        let caps = pattern_match(&p, "anything at all").unwrap();
        assert_eq!(caps.get("name").unwrap(), "anything at all");
    }

    #[test]
    fn test_simple_pattern() {
        let p = Pattern::parse("Bearer {{token}}").unwrap();
        assert_eq!(p.kind(), PatternKind::Simple);
        let caps = pattern_match(&p, "Bearer abc123").unwrap();
        assert_eq!(caps.get("token").unwrap(), "abc123");
        assert_eq!(
            pattern_render(&p, &["abc123".to_string()]),
            "Bearer abc123"
        );
    }

    #[test]
    fn test_hints() {
        let p = Pattern::parse("{{?-name}}").unwrap();
        assert!(p.vars[0].hint.optional);
        assert!(p.vars[0].hint.hidden);

        let p = Pattern::parse("{{@secret @noexport token}}").unwrap();
        assert!(p.vars[0].hint.secret);
        assert!(p.vars[0].hint.noexport);
        assert_eq!(p.vars[0].param, "token");

        let p = Pattern::parse("{{!id}}").unwrap();
        assert!(p.vars[0].hint.required);
    }

    #[test]
    fn test_expression_pattern() {
        let p = Pattern::parse("{{-world = globe.toUpperCase()}}").unwrap();
        assert_eq!(p.kind(), PatternKind::Expressive);
        assert_eq!(p.vars[0].param, "world");
        assert_eq!(p.vars[0].expr.as_deref(), Some("globe.toUpperCase()"));
        assert!(p.vars[0].hint.hidden);

        let p = Pattern::parse("{{= a + b}}").unwrap();
        assert_eq!(p.vars[0].param, "");
        assert_eq!(p.vars[0].expr.as_deref(), Some("a + b"));
    }

    #[test]
    fn test_nonempty_regex() {
        let p = Pattern::parse("{{@nonempty id}}").unwrap();
        assert_eq!(p.vars[0].re, ".+");
        assert!(pattern_match(&p, "").is_none());
    }

    #[test]
    fn test_multi_var_repeated_param() {
        let p = Pattern::parse("{{a}}-{{a}}").unwrap();
        assert!(pattern_match(&p, "x-x").is_some());
        assert!(pattern_match(&p, "x-y").is_none());
    }

    #[test]
    fn test_unterminated() {
        assert!(Pattern::parse("{{oops").is_err());
    }

    #[test]
    fn test_patterns_match() {
        let lit = Pattern::parse("planet earth").unwrap();
        let triv = Pattern::parse("{{-globe}}").unwrap();
        let simple = Pattern::parse("PLANET {{planet}}").unwrap();
        assert!(patterns_match(&lit, &triv));
        assert!(patterns_match(&simple, &triv));
        assert!(patterns_match(&lit, &lit));

        let other = Pattern::parse("MOON {{m}}").unwrap();
        assert!(!patterns_match(&simple, &other));
        assert!(patterns_match(
            &Pattern::parse("a{{x}}b").unwrap(),
            &Pattern::parse("a{{y}}b").unwrap()
        ));
    }

    #[test]
    fn test_partial_render() {
        let p = Pattern::parse("{{proto}}://{{host}}/api").unwrap();
        let mut known = IndexMap::new();
        known.insert("proto".to_string(), "https".to_string());
        assert_eq!(pattern_render_partial(&p, &known), "https://{{host}}/api");
    }

    #[test]
    fn test_equivalent() {
        let a = Pattern::parse("{{x}}").unwrap();
        let b = Pattern::parse("{{?x}}").unwrap();
        let c = Pattern::parse("{{y}}").unwrap();
        assert!(a.equivalent(&b));
        assert!(!a.equivalent(&c));
    }
}
