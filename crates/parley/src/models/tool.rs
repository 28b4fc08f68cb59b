use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON-Schema primitive a tool parameter accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// Lower-case JSON-Schema spelling, as OpenAI, Ollama and Anthropic expect
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
}

impl ToolParameter {
    pub fn required<N, D>(name: N, param_type: ParamType, description: D) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
        }
    }

    pub fn optional<N, D>(name: N, param_type: ParamType, description: D) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }
}

/// A tool that can be used by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// The name of the tool, unique across a catalog
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// Parameters that the tool accepts, in declaration order
    pub parameters: Vec<ToolParameter>,
}

impl Tool {
    pub fn new<N, D>(name: N, description: D, parameters: Vec<ToolParameter>) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Names of the required parameters, in declaration order
    pub fn required_parameters(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect()
    }
}

/// A model-issued request to invoke a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned id; Ollama and Gemini don't send one
    pub id: Option<String>,
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new<S: Into<String>>(id: Option<String>, name: S, arguments: Map<String, Value>) -> Self {
        Self {
            id,
            name: name.into(),
            arguments,
        }
    }

    /// Build a call from a JSON value, treating anything but an object as no arguments
    pub fn from_value<S: Into<String>>(id: Option<String>, name: S, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(id, name, arguments)
    }

    /// Fetch a string argument by name
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }
}

/// The text outcome of executing one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub tool_call_id: String,
    pub content: String,
}

impl ToolCallResult {
    pub fn new<S: Into<String>, C: Into<String>>(tool_call_id: S, content: C) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }
}
