//! Configuration merge logic.
//!
//! Layers merge with object keys deep-merged, arrays replaced wholesale,
//! and scalars overridden. The last layer has the highest precedence.

use serde_json::Value;

/// Deep merge two JSON values.
///
/// Objects deep-merge by key; arrays and scalars are replaced by the
/// overlay, and null overrides anything.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = if let Some(base_value) = base_map.remove(&key) {
                    deep_merge(base_value, overlay_value)
                } else {
                    overlay_value
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }

        (_, overlay) => overlay,
    }
}

/// Merge config layers in order; the first is the base, the last wins
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}
