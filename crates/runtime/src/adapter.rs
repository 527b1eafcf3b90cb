//! Calling-convention adapter: capability descriptors to model tool specs.

use serde_json::{Map, Value, json};

use crate::llm::ToolSpec;
use crate::tools::CapabilityDescriptor;

/// Convert the registry into tool specs, preserving order.
///
/// A schema that is not an object-typed schema is treated as a bare
/// property map and wrapped as `{"type":"object","properties":<schema>}`.
/// Only `type`, `properties` and `required` are carried over.
pub fn adapt(capabilities: &[CapabilityDescriptor]) -> Vec<ToolSpec> {
    capabilities
        .iter()
        .map(|c| ToolSpec {
            name: c.exposed_name.clone(),
            description: c.description.clone(),
            parameters: object_schema(&c.parameter_schema),
        })
        .collect()
}

fn object_schema(schema: &Value) -> Value {
    let is_object_schema = schema.get("type").and_then(Value::as_str) == Some("object");
    if !is_object_schema {
        let properties = if schema.is_object() {
            schema.clone()
        } else {
            json!({})
        };
        return json!({ "type": "object", "properties": properties });
    }

    let mut out = Map::new();
    out.insert("type".into(), Value::from("object"));
    out.insert(
        "properties".into(),
        schema.get("properties").cloned().unwrap_or_else(|| json!({})),
    );
    if let Some(required) = schema.get("required") {
        out.insert("required".into(), required.clone());
    }
    Value::Object(out)
}

/// Keys listed under `required` that `arguments` does not provide.
pub fn missing_required<'a>(schema: &'a Value, arguments: &Value) -> Vec<&'a str> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Vec::new();
    };
    required
        .iter()
        .filter_map(Value::as_str)
        .filter(|key| arguments.get(key).is_none())
        .collect()
}
