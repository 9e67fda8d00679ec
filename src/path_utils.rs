//! Dotted identifier paths and JSON traversal.
//!
//! Identifiers in patterns and expressions are dotted paths (`order.items.0.id`,
//! `map.$key`). Paths are parsed once into segment vectors and traversed
//! against `serde_json` values without allocation in the common case.

use serde_json::Value;
use smallvec::SmallVec;

/// One segment of a dotted identifier path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// SmallVec for path segments - avoids heap allocation for common cases (<= 4 segments)
pub type PathVec = SmallVec<[PathSegment; 4]>;

#[inline]
pub fn parse_path(path: &str) -> PathVec {
    let mut segments = PathVec::new();
    if path.is_empty() {
        return segments;
    }

    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        if let Ok(idx) = part.parse::<usize>() {
            segments.push(PathSegment::Index(idx));
        } else {
            segments.push(PathSegment::Key(part.to_string()));
        }
    }

    segments
}

#[inline]
pub fn traverse<'a>(value: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => {
                current = map.get(key)?;
            }
            (PathSegment::Index(index), Value::Array(arr)) => {
                current = arr.get(*index)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Look up a dotted path in a JSON value.
#[inline]
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    traverse(value, &parse_path(path))
}

/// Insert a value at a dotted path, creating intermediate objects and
/// growing arrays as needed. Array slots grow to the max index observed.
pub fn insert_path(target: &mut Value, path: &str, new_value: Value) {
    let segments = parse_path(path);
    if segments.is_empty() {
        *target = new_value;
        return;
    }

    let mut current = target;
    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        match segment {
            PathSegment::Key(key) => {
                if !current.is_object() {
                    *current = Value::Object(serde_json::Map::new());
                }
                let map = current.as_object_mut().unwrap();
                if last {
                    map.insert(key.clone(), new_value);
                    return;
                }
                current = map.entry(key.clone()).or_insert(Value::Null);
            }
            PathSegment::Index(index) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                let arr = current.as_array_mut().unwrap();
                while arr.len() <= *index {
                    arr.push(Value::Null);
                }
                if last {
                    arr[*index] = new_value;
                    return;
                }
                current = &mut arr[*index];
            }
        }
    }
}

/// The first segment of a dotted path (`map.$key` -> `map`).
#[inline]
pub fn root_segment(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// The trailing segment of a dotted path (`map.$key` -> `$key`).
#[inline]
pub fn leaf_segment(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

/// True when `path` is a plain single-segment identifier.
#[inline]
pub fn is_simple_ident(path: &str) -> bool {
    !path.is_empty()
        && !path.contains('.')
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '@')
        && !path.starts_with(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_path() {
        let segments = parse_path("user.items.2.id");
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0], PathSegment::Key("user".into()));
        assert_eq!(segments[2], PathSegment::Index(2));
    }

    #[test]
    fn test_lookup_path() {
        let data = json!({"user": {"items": [{"id": "a"}, {"id": "b"}]}});
        assert_eq!(lookup_path(&data, "user.items.1.id"), Some(&json!("b")));
        assert_eq!(lookup_path(&data, "user.missing"), None);
    }

    #[test]
    fn test_insert_path_grows_arrays() {
        let mut data = json!({});
        insert_path(&mut data, "items.2.id", json!("c"));
        assert_eq!(data, json!({"items": [null, null, {"id": "c"}]}));
    }

    #[test]
    fn test_root_and_leaf() {
        assert_eq!(root_segment("map.$key"), "map");
        assert_eq!(leaf_segment("map.$key"), "$key");
        assert!(is_simple_ident("order_id"));
        assert!(!is_simple_ident("order.id"));
    }
}
