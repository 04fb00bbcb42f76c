//! Strict JSON-schema generation for structured-output requests.
//!
//! Structured output needs `additionalProperties: false` on every object,
//! every property listed in `required` (nullable ones included) and no `$ref`.

use schemars::{schema_for, JsonSchema};
use serde_json::Value as JsonValue;

pub fn strict_schema<T: JsonSchema>() -> JsonValue {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_default();

    close_objects(&mut value);
    inline_refs(&mut value);

    if let JsonValue::Object(map) = &mut value {
        map.remove("definitions");
        map.remove("$schema");
        map.remove("title");
    }
    value
}

fn close_objects(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => {
            if map.get("type") == Some(&JsonValue::String("object".into())) {
                map.insert("additionalProperties".into(), JsonValue::Bool(false));
                if let Some(JsonValue::Object(props)) = map.get("properties") {
                    let keys = props.keys().cloned().map(JsonValue::String).collect();
                    map.insert("required".into(), JsonValue::Array(keys));
                }
            }
            for (_, v) in map.iter_mut() {
                close_objects(v);
            }
        }
        JsonValue::Array(items) => items.iter_mut().for_each(close_objects),
        _ => {}
    }
}

fn inline_refs(value: &mut JsonValue) {
    let definitions = match value {
        JsonValue::Object(map) => map.get("definitions").cloned(),
        _ => None,
    };
    if let Some(defs) = definitions {
        inline_recursive(value, &defs);
    }
}

fn inline_recursive(value: &mut JsonValue, definitions: &JsonValue) {
    match value {
        JsonValue::Object(map) => {
            if let Some(JsonValue::String(path)) = map.get("$ref").cloned() {
                if let Some(def) = path
                    .strip_prefix("#/definitions/")
                    .and_then(|name| definitions.get(name))
                {
                    *value = def.clone();
                    inline_recursive(value, definitions);
                    return;
                }
            }

            // schemars wraps referenced fields with docs in a single-element allOf.
            if let Some(JsonValue::Array(all_of)) = map.get("allOf").cloned() {
                if let [only] = all_of.as_slice() {
                    *value = only.clone();
                    inline_recursive(value, definitions);
                    return;
                }
            }

            for (_, v) in map.iter_mut() {
                inline_recursive(v, definitions);
            }
        }
        JsonValue::Array(items) => {
            for item in items.iter_mut() {
                inline_recursive(item, definitions);
            }
        }
        _ => {}
    }
}
