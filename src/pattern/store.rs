//! Global interned store for compiled match regexes.
//!
//! Pattern sources repeat heavily across layers and requests; compiling the
//! match regex once per process and sharing it across engine instances keeps
//! repeated merges cheap. Thread-safe so unrelated renders can run on
//! different threads.

use crate::error::PatternError;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static REGEX_STORE: Lazy<DashMap<String, Arc<Regex>>> = Lazy::new(DashMap::new);

/// Compile (or fetch) the anchored regex for a pattern's match form.
pub fn compiled_regex(source: &str) -> Result<Arc<Regex>, PatternError> {
    if let Some(existing) = REGEX_STORE.get(source) {
        return Ok(existing.clone());
    }

    let compiled = Regex::new(source).map_err(|e| PatternError::InvalidPattern {
        source_text: source.to_string(),
        reason: e.to_string(),
    })?;
    let compiled = Arc::new(compiled);
    REGEX_STORE.insert(source.to_string(), compiled.clone());
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning() {
        let a = compiled_regex("^x(.*)$").unwrap();
        let b = compiled_regex("^x(.*)$").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_invalid_regex() {
        assert!(compiled_regex("^((").is_err());
    }
}
