//! Structural validation of tool arguments.
//!
//! The registry checks only what a JSON Schema's `type`, `properties`,
//! and `required` members can express, plus numeric and length bounds.
//! Anything deeper is the handler's domain validation.

use serde_json::Value;

use crate::error::ToolError;

/// Validates `args` against a tool's input schema.
///
/// A missing `params` member is treated as an empty object so tools with
/// no required fields accept bare calls.
///
/// # Errors
///
/// Returns [`ToolError::InvalidParams`] naming the first violated
/// constraint.
pub fn validate(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let Some(schema_obj) = schema.as_object() else {
        // A non-object schema constrains nothing.
        return Ok(());
    };

    if schema_obj.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(ToolError::InvalidParams(
            "arguments must be an object".to_string(),
        ));
    }

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if args.get(key).is_none() {
                return Err(ToolError::InvalidParams(format!(
                    "missing required field '{key}'"
                )));
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
        for (key, property) in properties {
            let Some(value) = args.get(key) else {
                continue;
            };
            check_property(key, property, value)?;
        }
    }

    Ok(())
}

/// Checks one present argument against its property schema.
fn check_property(key: &str, property: &Value, value: &Value) -> Result<(), ToolError> {
    if let Some(expected) = property.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            return Err(ToolError::InvalidParams(format!(
                "field '{key}' must be of type {expected}"
            )));
        }
    }

    if let Some(minimum) = property.get("minimum").and_then(Value::as_f64) {
        if let Some(number) = value.as_f64() {
            if number < minimum {
                return Err(ToolError::InvalidParams(format!(
                    "field '{key}' must be >= {minimum}"
                )));
            }
        }
    }

    if let Some(maximum) = property.get("maximum").and_then(Value::as_f64) {
        if let Some(number) = value.as_f64() {
            if number > maximum {
                return Err(ToolError::InvalidParams(format!(
                    "field '{key}' must be <= {maximum}"
                )));
            }
        }
    }

    if let Some(min_length) = property.get("minLength").and_then(Value::as_u64) {
        if let Some(text) = value.as_str() {
            if (text.chars().count() as u64) < min_length {
                return Err(ToolError::InvalidParams(format!(
                    "field '{key}' must be at least {min_length} characters"
                )));
            }
        }
    }

    if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(ToolError::InvalidParams(format!(
                "field '{key}' must be one of the allowed values"
            )));
        }
    }

    Ok(())
}

/// JSON type check matching JSON Schema primitive names.
fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "minLength": 1},
                "limit": {"type": "integer", "minimum": 1, "maximum": 100}
            },
            "required": ["query"]
        })
    }

    #[test]
    fn valid_arguments_pass() {
        let args = json!({"query": "memory", "limit": 10});
        assert!(validate(&query_schema(), &args).is_ok());
    }

    #[test]
    fn missing_required_field_fails() {
        let args = json!({"limit": 10});
        let err = validate(&query_schema(), &args).unwrap_err();
        assert!(err.to_string().contains("query"));
        assert!(err.to_string().starts_with("Invalid params"));
    }

    #[test]
    fn wrong_type_fails() {
        let args = json!({"query": 42});
        let err = validate(&query_schema(), &args).unwrap_err();
        assert!(err.to_string().contains("string"));
    }

    #[test]
    fn integer_rejects_float() {
        let args = json!({"query": "x", "limit": 2.5});
        let err = validate(&query_schema(), &args).unwrap_err();
        assert!(err.to_string().contains("integer"));
    }

    #[test]
    fn bounds_enforced() {
        let args = json!({"query": "x", "limit": 0});
        assert!(validate(&query_schema(), &args).is_err());

        let args = json!({"query": "x", "limit": 101});
        assert!(validate(&query_schema(), &args).is_err());

        let args = json!({"query": "x", "limit": 100});
        assert!(validate(&query_schema(), &args).is_ok());
    }

    #[test]
    fn min_length_enforced() {
        let args = json!({"query": ""});
        let err = validate(&query_schema(), &args).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn enum_enforced() {
        let schema = json!({
            "type": "object",
            "properties": {
                "priority": {"type": "string", "enum": ["low", "normal", "high", "critical"]}
            }
        });

        assert!(validate(&schema, &json!({"priority": "high"})).is_ok());
        assert!(validate(&schema, &json!({"priority": "urgent"})).is_err());
    }

    #[test]
    fn non_object_arguments_fail_object_schema() {
        let err = validate(&query_schema(), &json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("object"));
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let schema = json!({
            "type": "object",
            "properties": {"limit": {"type": "integer"}}
        });
        assert!(validate(&schema, &json!({})).is_ok());
    }
}
