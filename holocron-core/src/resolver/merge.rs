use serde_json::{Map, Value};

/// Null, empty string (after trim), empty list or empty object.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Merge `incoming` into `existing` in place.
///
/// Missing keys are copied. Lists union with duplicates removed, keeping
/// first-seen order; a non-empty scalar arriving for a list key is appended.
/// Empty values are overwritten by non-empty ones. Otherwise the existing
/// value stays.
pub fn merge_properties(existing: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, new_value) in incoming {
        let Some(current) = existing.get_mut(key) else {
            existing.insert(key.clone(), new_value.clone());
            continue;
        };

        if is_empty_value(new_value) {
            continue;
        }

        if let Value::Array(items) = current {
            let additions: Vec<&Value> = match new_value {
                Value::Array(new_items) => new_items.iter().collect(),
                scalar => vec![scalar],
            };
            for item in additions {
                if !is_empty_value(item) && !items.contains(item) {
                    items.push(item.clone());
                }
            }
            continue;
        }

        if is_empty_value(current) {
            *current = new_value.clone();
        }
    }
}
