//! Leading-dot field path navigation for in-memory JSON document mutation,
//! mirroring the subset of `JSON.SET`'s path syntax this runtime actually
//! uses: `.` for the document root, `.Field.Sub` for nested objects. No
//! array indices or wildcards — the transfer manifest only ever nests
//! plain objects keyed by uuid strings.

use serde_json::{Map, Value};

fn segments(path: &str) -> Vec<&str> {
    path.trim_start_matches('.').split('.').filter(|s| !s.is_empty()).collect()
}

/// Reads the value at `path` within `doc`, or `None` if any segment is
/// missing.
pub fn get<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let segs = segments(path);
    let mut cur = doc;
    for seg in segs {
        cur = cur.as_object()?.get(seg)?;
    }
    Some(cur)
}

/// Sets `value` at `path` within `doc`, creating intermediate objects as
/// needed. If `nx` is true and a value already sits at `path`, this is a
/// no-op and returns `false`.
pub fn set(doc: &mut Value, path: &str, value: Value, nx: bool) -> bool {
    let segs = segments(path);
    if segs.is_empty() {
        if nx && !doc.is_null() {
            return false;
        }
        *doc = value;
        return true;
    }
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let mut cur = doc;
    for seg in &segs[..segs.len() - 1] {
        let obj = cur.as_object_mut().expect("ensured object above");
        cur = obj
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
    }
    let last = segs[segs.len() - 1];
    let obj = cur.as_object_mut().expect("ensured object above");
    if nx && obj.contains_key(last) {
        return false;
    }
    obj.insert(last.to_string(), value);
    true
}

/// Deletes the value at `path`. Returns `true` if something was removed.
pub fn del(doc: &mut Value, path: &str) -> bool {
    let segs = segments(path);
    if segs.is_empty() {
        let removed = !doc.is_null();
        *doc = Value::Null;
        return removed;
    }
    let mut cur = doc;
    for seg in &segs[..segs.len() - 1] {
        match cur.as_object_mut().and_then(|o| o.get_mut(*seg)) {
            Some(next) => cur = next,
            None => return false,
        }
    }
    match cur.as_object_mut() {
        Some(obj) => obj.remove(segs[segs.len() - 1]).is_some(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_creates_nested_path() {
        let mut doc = Value::Null;
        assert!(set(&mut doc, ".EntityTransfers.abc", json!({"Stage": "Prepare"}), false));
        assert_eq!(get(&doc, ".EntityTransfers.abc.Stage"), Some(&json!("Prepare")));
    }

    #[test]
    fn nx_respects_existing_value() {
        let mut doc = json!({"a": {"b": 1}});
        assert!(!set(&mut doc, ".a.b", json!(2), true));
        assert_eq!(get(&doc, ".a.b"), Some(&json!(1)));
        assert!(set(&mut doc, ".a.c", json!(2), true));
        assert_eq!(get(&doc, ".a.c"), Some(&json!(2)));
    }

    #[test]
    fn del_removes_leaf_only() {
        let mut doc = json!({"a": {"b": 1, "c": 2}});
        assert!(del(&mut doc, ".a.b"));
        assert_eq!(get(&doc, ".a.b"), None);
        assert_eq!(get(&doc, ".a.c"), Some(&json!(2)));
    }
}
