//! Tool descriptors and schema validation.
//!
//! A `ToolDefinition` is what the completion provider sees. Before a tool
//! runs, the provider-supplied arguments are checked against the
//! definition's `ToolParameters`; nothing is invoked with arguments that
//! fail that check.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: ToolParameters::default(),
        }
    }

    pub fn with_parameters(mut self, parameters: ToolParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Validate provider-supplied arguments against this tool's schema.
    pub fn validate(&self, arguments: &Value) -> Result<(), Error> {
        self.parameters
            .validate(arguments)
            .map_err(|e| Error::validation(format!("{}: {}", self.name, e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: HashMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(rename = "additionalProperties", default)]
    pub additional_properties: bool,
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: HashMap::new(),
            required: Vec::new(),
            additional_properties: false,
        }
    }
}

impl ToolParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_property(
        mut self,
        name: impl Into<String>,
        schema: PropertySchema,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), schema);
        if required {
            self.required.push(name);
        }
        self
    }

    /// Check an argument object against this schema.
    ///
    /// `null` is accepted as an empty object, since providers commonly send
    /// it for tools without parameters. Optional properties may be `null`.
    pub fn validate(&self, arguments: &Value) -> Result<(), String> {
        let empty = Map::new();
        let object = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(format!(
                    "arguments must be a JSON object, got {}",
                    json_type(other)
                ))
            }
        };

        for name in &self.required {
            match object.get(name) {
                None | Some(Value::Null) => {
                    return Err(format!("missing required argument '{}'", name))
                }
                Some(_) => {}
            }
        }

        for (name, value) in object {
            match self.properties.get(name) {
                Some(schema) => {
                    if value.is_null() && !self.required.contains(name) {
                        continue;
                    }
                    schema.validate(name, value)?;
                }
                None if !self.additional_properties => {
                    return Err(format!("unexpected argument '{}'", name));
                }
                None => {}
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    /// Regular expression a string value must match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
}

impl PropertySchema {
    fn typed(schema_type: &str, description: impl Into<String>) -> Self {
        Self {
            schema_type: schema_type.to_string(),
            description: Some(description.into()),
            enum_values: None,
            pattern: None,
            default: None,
            items: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::typed("string", description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::typed("integer", description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::typed("boolean", description)
    }

    pub fn array(description: impl Into<String>, items: PropertySchema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::typed("array", description)
        }
    }

    pub fn enum_string(description: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            enum_values: Some(values),
            ..Self::typed("string", description)
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn validate(&self, name: &str, value: &Value) -> Result<(), String> {
        let type_ok = match self.schema_type.as_str() {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !type_ok {
            return Err(format!(
                "argument '{}' must be {}, got {}",
                name,
                self.schema_type,
                json_type(value)
            ));
        }

        if let Some(text) = value.as_str() {
            if let Some(allowed) = &self.enum_values {
                if !allowed.iter().any(|v| v == text) {
                    return Err(format!(
                        "argument '{}' must be one of [{}], got '{}'",
                        name,
                        allowed.join(", "),
                        text
                    ));
                }
            }
            if let Some(pattern) = &self.pattern {
                let re = regex::Regex::new(pattern)
                    .map_err(|e| format!("invalid pattern for '{}': {}", name, e))?;
                if !re.is_match(text) {
                    return Err(format!(
                        "argument '{}' does not match the expected format ({})",
                        name, pattern
                    ));
                }
            }
        }

        if let (Some(items), Some(values)) = (&self.items, value.as_array()) {
            for (i, item) in values.iter().enumerate() {
                items.validate(&format!("{}[{}]", name, i), item)?;
            }
        }

        Ok(())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Outcome of one tool invocation, fed back into the conversation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }

    /// Structured failure payload, so the provider can tell an error from data.
    pub fn error_json(kind: &str, message: impl Into<String>) -> Self {
        let body = serde_json::json!({
            "error": kind,
            "message": message.into(),
        });
        Self::error(body.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup_definition() -> ToolDefinition {
        ToolDefinition::new("check_submission", "Check a submission").with_parameters(
            ToolParameters::new().add_property(
                "identifier",
                PropertySchema::string("Submission UUID").with_pattern(r"^[0-9a-fA-F-]{36}$"),
                true,
            ),
        )
    }

    #[test]
    fn test_tool_definition() {
        let def = lookup_definition();
        assert_eq!(def.name, "check_submission");
        assert!(def.parameters.required.contains(&"identifier".to_string()));
    }

    #[test]
    fn test_validate_accepts_good_arguments() {
        let def = lookup_definition();
        let args = json!({"identifier": "123e4567-e89b-12d3-a456-426614174000"});
        assert!(def.validate(&args).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_and_extra() {
        let def = lookup_definition();

        let err = def.validate(&json!({})).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("missing required argument 'identifier'"));

        let err = def
            .validate(&json!({"identifier": "123e4567-e89b-12d3-a456-426614174000", "x": 1}))
            .unwrap_err();
        assert!(err.to_string().contains("unexpected argument 'x'"));
    }

    #[test]
    fn test_validate_rejects_wrong_type_and_pattern() {
        let def = lookup_definition();
        assert!(def.validate(&json!({"identifier": 42})).is_err());
        assert!(def.validate(&json!({"identifier": "not-a-uuid"})).is_err());
        assert!(def.validate(&json!("identifier")).is_err());
    }

    #[test]
    fn test_validate_null_means_no_arguments() {
        let def = ToolDefinition::new("fetch_threat_feed", "Fetch the feed");
        assert!(def.validate(&Value::Null).is_ok());
        assert!(def.validate(&json!({})).is_ok());
    }

    #[test]
    fn test_optional_null_and_enum() {
        let params = ToolParameters::new()
            .add_property(
                "mode",
                PropertySchema::enum_string("Mode", vec!["a".into(), "b".into()]),
                false,
            )
            .add_property("author", PropertySchema::string("Author"), false);

        assert!(params.validate(&json!({"author": null})).is_ok());
        assert!(params.validate(&json!({"mode": "a"})).is_ok());
        assert!(params.validate(&json!({"mode": "c"})).is_err());
    }

    #[test]
    fn test_tool_output() {
        let success = ToolOutput::success("done");
        assert!(!success.is_error);

        let error = ToolOutput::error_json("validation", "bad date");
        assert!(error.is_error);
        let body: Value = serde_json::from_str(&error.content).unwrap();
        assert_eq!(body["error"], "validation");
    }
}
