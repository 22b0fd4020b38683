use serde_json::Value;

/// Older brokers wrap the payload of some responses in a `result` object,
/// newer ones place the same fields at the top level. Flatten the wrapper so
/// that everything above the transport sees the current shape.
pub fn normalize_response(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            if matches!(map.get("result"), Some(Value::Object(_))) {
                if let Some(Value::Object(result)) = map.remove("result") {
                    for (key, value) in result {
                        map.insert(key, value);
                    }
                }
            }
            Value::Object(map)
        }
        other => other,
    }
}
