//! Recursive merge of nested JSON objects
//!
//! Log lines are partial updates; a record's state is the fold of every
//! update into one nested mapping. Two precedence rules are needed:
//!
//! - within one file, later lines replace earlier values (`overwrite = true`)
//! - across files, the file read first keeps its values (`overwrite = false`)

use serde_json::{Map, Value};

/// Nested mapping of string keys to scalars or further mappings.
pub type Snapshot = Map<String, Value>;

/// Fold `source` into `target`.
///
/// For every key in `source`:
/// - absent in `target`: inserted
/// - both values are objects: merged recursively
/// - otherwise: replaced when `overwrite`, kept when not
///
/// # Example
///
/// ```rust
/// use fitlog_reader::merge::merge;
/// use serde_json::json;
///
/// let mut target = json!({"a": 1, "nested": {"x": 1}}).as_object().cloned().unwrap();
/// let source = json!({"a": 2, "nested": {"y": 2}}).as_object().cloned().unwrap();
///
/// merge(&mut target, source, false);
/// assert_eq!(target["a"], 1);
/// assert_eq!(target["nested"], json!({"x": 1, "y": 2}));
/// ```
pub fn merge(target: &mut Snapshot, source: Snapshot, overwrite: bool) {
    for (key, incoming) in source {
        match target.get_mut(&key) {
            None => {
                target.insert(key, incoming);
            }
            Some(slot) => match (slot, incoming) {
                (Value::Object(existing), Value::Object(nested)) => {
                    merge(existing, nested, overwrite);
                }
                (slot, other) => {
                    if overwrite {
                        *slot = other;
                    }
                }
            },
        }
    }
}

/// Owned variant of [`merge`] for fold-style call sites.
#[must_use]
pub fn merged(mut target: Snapshot, source: Snapshot, overwrite: bool) -> Snapshot {
    merge(&mut target, source, overwrite);
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Snapshot {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_overwrite_replaces_scalar() {
        let result = merged(obj(json!({"a": 1})), obj(json!({"a": 2})), true);
        assert_eq!(Value::Object(result), json!({"a": 2}));
    }

    #[test]
    fn test_no_overwrite_keeps_scalar() {
        let result = merged(obj(json!({"a": 1})), obj(json!({"a": 2})), false);
        assert_eq!(Value::Object(result), json!({"a": 1}));
    }

    #[test]
    fn test_nested_merge_keeps_siblings() {
        let result = merged(
            obj(json!({"meta": {"state": "running", "host": "gpu0"}})),
            obj(json!({"meta": {"state": "finish"}})),
            true,
        );
        assert_eq!(
            Value::Object(result),
            json!({"meta": {"state": "finish", "host": "gpu0"}})
        );
    }

    #[test]
    fn test_object_vs_scalar_respects_overwrite() {
        let kept = merged(obj(json!({"a": {"b": 1}})), obj(json!({"a": 3})), false);
        assert_eq!(Value::Object(kept), json!({"a": {"b": 1}}));

        let replaced = merged(obj(json!({"a": {"b": 1}})), obj(json!({"a": 3})), true);
        assert_eq!(Value::Object(replaced), json!({"a": 3}));

        let scalar_to_obj = merged(obj(json!({"a": 3})), obj(json!({"a": {"b": 1}})), true);
        assert_eq!(Value::Object(scalar_to_obj), json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_empty_inputs() {
        let result = merged(Snapshot::new(), Snapshot::new(), true);
        assert!(result.is_empty());

        let result = merged(Snapshot::new(), obj(json!({"k": null})), false);
        assert_eq!(Value::Object(result), json!({"k": null}));
    }

    #[test]
    fn test_deep_nesting() {
        let mut deep_a = json!(1);
        let mut deep_b = json!(2);
        for depth in 0..64 {
            deep_a = json!({ format!("l{depth}"): deep_a });
            deep_b = json!({ format!("l{depth}"): deep_b, "extra": depth });
        }
        let result = merged(obj(deep_a), obj(deep_b), false);
        let mut cursor = &Value::Object(result);
        for depth in (0..64).rev() {
            cursor = &cursor[format!("l{depth}")];
        }
        assert_eq!(*cursor, json!(1));
    }
}
