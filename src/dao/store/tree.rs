//! Path operations over a JSON tree, following realtime-database semantics: `null` means
//! absent and empty objects are never stored.

use serde_json::{Map, Value};

static NULL: Value = Value::Null;

/// Split a slash separated path into its non-empty segments.
pub fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether one path is an ancestor of (or equal to) the other.
pub fn overlaps(a: &[String], b: &[String]) -> bool {
    a.iter().zip(b.iter()).all(|(left, right)| left == right)
}

/// Borrow the value stored at `path`, or `null` when nothing is there.
pub fn get<'a>(root: &'a Value, path: &[String]) -> &'a Value {
    path.iter()
        .try_fold(root, |node, segment| node.get(segment.as_str()))
        .unwrap_or(&NULL)
}

/// Replace the value at `path`; writing `null` removes it.
pub fn set(root: &mut Value, path: &[String], value: Value) {
    set_at(root, path, normalize(value));
    if is_empty(root) {
        *root = Value::Null;
    }
}

/// Remove whatever is stored at `path`.
pub fn remove(root: &mut Value, path: &[String]) {
    set(root, path, Value::Null);
}

/// Merge `patch` into the object at `path`. Keys may themselves be nested paths, which is
/// how several locations are written in one atomic update.
pub fn merge(root: &mut Value, path: &[String], patch: Map<String, Value>) {
    for (key, value) in patch {
        let mut target = path.to_vec();
        target.extend(segments(&key));
        set(root, &target, value);
    }
}

/// Strip `null` leaves and empty objects the way the store does on write.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .map(|(key, child)| (key, normalize(child)))
                .filter(|(_, child)| !child.is_null())
                .collect();
            if cleaned.is_empty() {
                Value::Null
            } else {
                Value::Object(cleaned)
            }
        }
        other => other,
    }
}

fn set_at(node: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        if value.is_null() {
            map.remove(head);
        } else {
            map.insert(head.clone(), value);
        }
        return;
    }

    let child = map.entry(head.clone()).or_insert(Value::Null);
    set_at(child, rest, value);
    if is_empty(child) {
        map.remove(head);
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
