//! Dot-path access into JSON values

use serde_json::Value;

pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

pub fn lookup_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(move |i| items.get_mut(i)),
        _ => None,
    })
}

/// Set a value, creating intermediate objects. Returns false when an
/// intermediate node is not an object.
pub fn assign(root: &mut Value, path: &str, value: Value) -> bool {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (parent, leaf),
        None => ("", path),
    };

    let mut node = root;
    if !parent.is_empty() {
        for segment in parent.split('.') {
            if node.is_null() {
                *node = Value::Object(Default::default());
            }
            node = match node {
                Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
                _ => return false,
            };
        }
    }
    if node.is_null() {
        *node = Value::Object(Default::default());
    }
    match node {
        Value::Object(map) => {
            map.insert(leaf.to_string(), value);
            true
        }
        _ => false,
    }
}

pub fn remove(root: &mut Value, path: &str) -> Option<Value> {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (parent, leaf),
        None => ("", path),
    };
    match lookup_mut(root, parent)? {
        Value::Object(map) => map.remove(leaf),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_nested_and_indexed() {
        let doc = json!({"a": {"b": [{"c": 1}, {"c": 2}]}});
        assert_eq!(lookup(&doc, "a.b.1.c"), Some(&json!(2)));
        assert_eq!(lookup(&doc, "a.x"), None);
        assert_eq!(lookup(&doc, "a.b.9"), None);
    }

    #[test]
    fn test_assign_creates_parents() {
        let mut doc = json!({});
        assert!(assign(&mut doc, "limits.memory_mb", json!(256)));
        assert_eq!(doc, json!({"limits": {"memory_mb": 256}}));
        assert!(!assign(&mut json!({"a": 1}), "a.b", json!(2)));
    }

    #[test]
    fn test_remove() {
        let mut doc = json!({"a": {"b": 1, "c": 2}});
        assert_eq!(remove(&mut doc, "a.b"), Some(json!(1)));
        assert_eq!(doc, json!({"a": {"c": 2}}));
    }
}
