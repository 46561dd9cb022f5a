//! JSON-Schema descriptor for tool inputs and the validated argument envelope.
//!
//! Only the object form of JSON-Schema is modelled; keywords we don't
//! interpret are kept in `extra` so a server's schema reaches the LLM
//! unchanged.

use crate::error::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A primitive JSON-Schema type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
}

impl JsonType {
    /// Whether `value` is assignable to this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Null => value.is_null(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Null => "null",
        }
    }
}

/// `"type": "string"` or `"type": ["string", "null"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaType {
    One(JsonType),
    Many(Vec<JsonType>),
}

impl SchemaType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::One(t) => t.accepts(value),
            Self::Many(ts) => ts.iter().any(|t| t.accepts(value)),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::One(t) => t.as_str().to_string(),
            Self::Many(ts) => ts.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(" | "),
        }
    }
}

/// The schema of a single property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SchemaType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PropertySchema {
    pub fn typed(kind: JsonType, description: impl Into<String>) -> Self {
        Self {
            kind: Some(SchemaType::One(kind)),
            description: Some(description.into()),
            ..Self::default()
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::typed(JsonType::String, description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::typed(JsonType::Integer, description)
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self::typed(JsonType::Number, description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::typed(JsonType::Boolean, description)
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Object-form JSON-Schema for a tool's arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type", default = "object_type")]
    pub kind: String,

    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn object_type() -> String {
    "object".into()
}

impl Default for ToolSchema {
    fn default() -> Self {
        Self::object()
    }
}

impl ToolSchema {
    /// An empty object schema.
    pub fn object() -> Self {
        Self {
            kind: object_type(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Parse a schema supplied by a provider. Anything that isn't an
    /// object schema degrades to an empty object schema.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(_) => serde_json::from_value(value).unwrap_or_default(),
            _ => Self::object(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }

    /// Validate `args` for `tool`: the value must be an object (null counts
    /// as `{}`), required keys must be present and non-null, and typed
    /// properties must be assignable.
    pub fn validate(&self, tool: &str, args: Value) -> Result<ValidatedArgs, ToolError> {
        let map = match args {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(ToolError::invalid_args(
                    tool,
                    format!("arguments must be an object, got {}", json_type_name(&other)),
                ));
            }
        };

        for key in &self.required {
            match map.get(key) {
                None | Some(Value::Null) => {
                    return Err(ToolError::invalid_args(
                        tool,
                        format!("missing required field '{key}'"),
                    ));
                }
                Some(_) => {}
            }
        }

        for (key, value) in &map {
            let Some(prop) = self.properties.get(key) else {
                continue;
            };
            if let Some(kind) = &prop.kind
                && !kind.accepts(value)
            {
                return Err(ToolError::invalid_args(
                    tool,
                    format!(
                        "field '{key}' expected {}, got {}",
                        kind.describe(),
                        json_type_name(value)
                    ),
                ));
            }
            if let Some(allowed) = &prop.enum_values
                && !allowed.contains(value)
            {
                return Err(ToolError::invalid_args(
                    tool,
                    format!("field '{key}' must be one of {}", Value::Array(allowed.clone())),
                ));
            }
        }

        Ok(ValidatedArgs(map))
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Arguments that passed schema validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedArgs(Map<String, Value>);

impl ValidatedArgs {
    /// Wrap a map without validation (for internal callers that built it).
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}
