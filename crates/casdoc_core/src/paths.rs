//! Dotted-path traversal over JSON values.

use serde_json::Value;

/// Looks up a dotted path (`"address.city"`) in a JSON tree.
///
/// Returns `None` when any segment is missing or a non-object is traversed.
pub(crate) fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Joins a parent path and a child segment into a dotted path.
pub(crate) fn join(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{base}.{segment}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_top_level() {
        let v = json!({"name": "test"});
        assert_eq!(lookup(&v, "name"), Some(&json!("test")));
    }

    #[test]
    fn lookup_nested() {
        let v = json!({"address": {"city": "Rome"}});
        assert_eq!(lookup(&v, "address.city"), Some(&json!("Rome")));
    }

    #[test]
    fn lookup_missing() {
        let v = json!({"name": "test"});
        assert!(lookup(&v, "missing").is_none());
        assert!(lookup(&v, "name.deeper").is_none());
    }

    #[test]
    fn join_paths() {
        assert_eq!(join("", "name"), "name");
        assert_eq!(join("address", "city"), "address.city");
    }
}
