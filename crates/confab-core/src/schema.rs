//! Tool schema helpers.
//!
//! Tools are advertised to the LLM in the OpenAI function-calling shape:
//! `{"type": "function", "function": {"name", "description", "parameters"}}`.
//! The argument-injection rules inspect the JSON Schema at call time (inject
//! `username` iff the schema declares it), so schemas travel alongside
//! registered tools as plain JSON values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool schema in OpenAI function-calling form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub kind: String,

    pub function: FunctionDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    /// Fully-qualified `{server}_{tool}` name.
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// JSON Schema of the tool inputs.
    pub parameters: Value,
}

impl ToolSchema {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Whether a JSON Schema declares `name` among its `properties`.
///
/// This is a structural check, not a validation pass; tools are never
/// matched by naming convention.
pub fn declares_property(schema: &Value, name: &str) -> bool {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.contains_key(name))
        .unwrap_or(false)
}

/// Look up a property schema by path (`"properties.filename"` style paths
/// are not needed; tools only nest one level).
pub fn property_schema<'a>(schema: &'a Value, name: &str) -> Option<&'a Value> {
    schema.get("properties").and_then(|props| props.get(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn declares_property_checks_structure() {
        let schema = json!({
            "type": "object",
            "properties": {
                "username": {"type": "string"},
                "filename": {"type": "string"}
            }
        });
        assert!(declares_property(&schema, "username"));
        assert!(declares_property(&schema, "filename"));
        assert!(!declares_property(&schema, "file_names"));
        assert!(!declares_property(&json!({"type": "object"}), "username"));
        assert!(!declares_property(&json!("not a schema"), "username"));
    }

    #[test]
    fn schema_serializes_in_function_form() {
        let schema = ToolSchema::function("srv_analyze", "Analyze a file", json!({"type": "object"}));
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "srv_analyze");
    }
}
