//! JSON merge patch (RFC 7386).
//!
//! Writers compute a patch between the copy they observed and the copy they
//! want, then apply it to whatever is stored now. Fields they did not touch
//! keep concurrent changes made by others.

use serde_json::{Map, Value};

/// Patch turning `original` into `modified`. `Value::Null` fields delete keys.
/// Returns an empty object when the two are equal.
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(orig), Value::Object(new)) => {
            let mut patch = Map::new();
            for (key, new_value) in new {
                match orig.get(key) {
                    Some(old_value) if old_value == new_value => {}
                    Some(old_value) if old_value.is_object() && new_value.is_object() => {
                        patch.insert(key.clone(), create_merge_patch(old_value, new_value));
                    }
                    _ => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }
            for key in orig.keys() {
                if !new.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Value::Object(patch)
        }
        (_, modified) => modified.clone(),
    }
}

pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                let entry = target_map.entry(key.clone()).or_insert(Value::Null);
                apply_merge_patch(entry, value);
            }
        }
    }
}

pub fn is_empty_patch(patch: &Value) -> bool {
    matches!(patch, Value::Object(m) if m.is_empty())
}
