//! Parameter schemas for capabilities
//!
//! A deliberately small subset of JSON Schema: an object with typed,
//! required-or-optional fields. It renders to the JSON Schema shape the
//! completion service expects and validates incoming arguments before the
//! handler ever sees them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// JSON type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    fn name(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }
}

/// One declared parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamField {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    #[serde(default)]
    pub description: String,
    /// Allowed string values, if restricted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

/// Parameter schema of a capability
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSchema {
    fields: Vec<ParamField>,
}

impl ParamSchema {
    /// Schema with no parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required parameter
    pub fn required(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.fields.push(ParamField {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
            allowed: Vec::new(),
        });
        self
    }

    /// Add an optional parameter
    pub fn optional(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.fields.push(ParamField {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
            allowed: Vec::new(),
        });
        self
    }

    /// Restrict the most recently added string parameter to a fixed set
    pub fn one_of(mut self, values: &[&str]) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.allowed = values.iter().map(|v| v.to_string()).collect();
        }
        self
    }

    pub fn fields(&self) -> &[ParamField] {
        &self.fields
    }

    /// Render as a JSON Schema object
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = json!({
                "type": field.kind.name(),
                "description": field.description,
            });
            if field.kind == ParamKind::Array {
                prop["items"] = json!({"type": "string"});
            }
            if !field.allowed.is_empty() {
                prop["enum"] = json!(field.allowed);
            }
            properties.insert(field.name.clone(), prop);
        }

        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check arguments against the schema.
    ///
    /// `null` is accepted as an empty object. Explicit `null` for an optional
    /// field counts as absent. Unknown fields are ignored.
    pub fn validate(&self, arguments: &Value) -> std::result::Result<(), String> {
        let empty = Map::new();
        let args = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(format!(
                    "arguments must be an object, got {}",
                    type_name(other)
                ))
            }
        };

        for field in &self.fields {
            match args.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(format!("missing required field '{}'", field.name));
                    }
                }
                Some(value) => {
                    if !field.kind.matches(value) {
                        return Err(format!(
                            "field '{}' must be {}, got {}",
                            field.name,
                            field.kind.name(),
                            type_name(value)
                        ));
                    }
                    if !field.allowed.is_empty() {
                        let ok = value
                            .as_str()
                            .map(|s| field.allowed.iter().any(|a| a == s))
                            .unwrap_or(false);
                        if !ok {
                            return Err(format!(
                                "field '{}' must be one of {:?}",
                                field.name, field.allowed
                            ));
                        }
                    }
                }
            }
        }

        Ok(())
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
