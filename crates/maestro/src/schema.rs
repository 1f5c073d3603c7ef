//! Parameter validation against registered capability schemas. Supports the
//! subset of JSON Schema the built-in and adapter schemas actually use:
//! object `type`, `properties`, `required`, `enum`, nullable type arrays and
//! `additionalProperties: false`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

/// One field-level validation problem.
#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq, Eq)]
#[ts(export)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate `params` against `schema`. An empty result means the parameters
/// are acceptable; a capability handler must never run when issues exist.
pub fn validate_params(schema: &Value, params: &Value) -> Vec<FieldIssue> {
    let mut issues = Vec::new();

    if schema_names_type(schema, "object") && !params.is_object() {
        issues.push(FieldIssue::new(
            "params",
            format!("expected an object, got {}", type_name(params)),
        ));
        return issues;
    }

    let fields = params.as_object();

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for name in required.iter().filter_map(|n| n.as_str()) {
            let present = fields.map(|f| f.contains_key(name)).unwrap_or(false);
            if !present {
                issues.push(FieldIssue::new(name, "missing required field"));
            }
        }
    }

    let properties = schema.get("properties").and_then(|p| p.as_object());

    if let (Some(properties), Some(fields)) = (properties, fields) {
        for (name, property) in properties {
            let Some(value) = fields.get(name) else {
                continue;
            };

            if !matches_declared_type(property, value) {
                issues.push(FieldIssue::new(
                    name.as_str(),
                    format!(
                        "expected {}, got {}",
                        declared_type_label(property),
                        type_name(value)
                    ),
                ));
                continue;
            }

            if let Some(allowed) = property.get("enum").and_then(|e| e.as_array()) {
                if !allowed.contains(value) {
                    issues.push(FieldIssue::new(
                        name.as_str(),
                        format!("value is not one of the allowed options: {}", value),
                    ));
                }
            }
        }

        if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
            for name in fields.keys() {
                if !properties.contains_key(name) {
                    issues.push(FieldIssue::new(name.as_str(), "unknown field"));
                }
            }
        }
    }

    issues
}

fn schema_names_type(schema: &Value, expected: &str) -> bool {
    match schema.get("type") {
        Some(Value::String(t)) => t == expected,
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some(expected)),
        _ => false,
    }
}

/// A property with no `type` accepts anything; a type array accepts any of
/// its members (schemars emits `["integer", "null"]` for optional fields).
fn matches_declared_type(property: &Value, value: &Value) -> bool {
    match property.get("type") {
        None => true,
        Some(Value::String(t)) => value_is_type(value, t),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(|t| t.as_str())
            .any(|t| value_is_type(value, t)),
        Some(_) => true,
    }
}

fn value_is_type(value: &Value, declared: &str) -> bool {
    match declared {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn declared_type_label(property: &Value) -> String {
    match property.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(" or "),
        _ => "any".to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
