//! Tool descriptors: the full `ToolSpec` sent to providers and bound into the
//! interpreter, and the lightweight `ToolInfo` used for search without
//! instantiation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Schema for one tool parameter.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// JSON-schema style type name ("string", "integer", "number", "boolean",
    /// "array", "object").
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(type_name: &str, description: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            description: description.to_string(),
            optional: false,
            default: None,
        }
    }

    pub fn optional(type_name: &str, description: &str, default: Option<Value>) -> Self {
        Self {
            type_name: type_name.to_string(),
            description: description.to_string(),
            optional: true,
            default,
        }
    }
}

/// Full tool descriptor: name, description, input schema, output type.
///
/// `inputs` maps parameter name to schema; declaration order is tracked
/// separately so positional argument mapping in the interpreter follows the
/// order parameters were declared in.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, ParamSpec>,
    #[serde(default)]
    pub output_type: String,
    #[serde(skip)]
    param_order: Vec<String>,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            inputs: BTreeMap::new(),
            output_type: "string".to_string(),
            param_order: Vec::new(),
        }
    }

    pub fn with_input(mut self, name: &str, param: ParamSpec) -> Self {
        if !self.inputs.contains_key(name) {
            self.param_order.push(name.to_string());
        }
        self.inputs.insert(name.to_string(), param);
        self
    }

    pub fn with_output(mut self, output_type: &str) -> Self {
        self.output_type = output_type.to_string();
        self
    }

    /// Parameter names in declaration order (name-sorted for specs that
    /// arrived over the wire without order information).
    pub fn input_names(&self) -> Vec<&str> {
        if self.param_order.len() == self.inputs.len() {
            self.param_order.iter().map(String::as_str).collect()
        } else {
            self.inputs.keys().map(String::as_str).collect()
        }
    }

    /// JSON-schema object for the provider wire
    /// (`{type: object, properties, required}`).
    pub fn input_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for (name, param) in &self.inputs {
            properties.insert(
                name.clone(),
                json!({"type": param.type_name, "description": param.description}),
            );
            if !param.optional {
                required.push(Value::String(name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Lightweight search record for this spec.
    pub fn to_info(&self, category: &str) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_names().iter().map(|s| s.to_string()).collect(),
            category: category.to_string(),
        }
    }
}

/// Lightweight tool record used by search: no instantiation required.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub category: String,
}

/// Python-safe tool name: dots and hyphens become underscores.
pub fn sanitize_tool_name(name: &str) -> String {
    name.replace(['.', '-'], "_")
}
