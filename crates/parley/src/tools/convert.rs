//! Pure mappings from the canonical catalog to each provider's tool schema.
//!
//! Parameter names and required-ness are carried over untouched; only the case
//! of type identifiers changes with the target convention.

use serde_json::{json, Map, Value};

use crate::models::tool::{ParamType, Tool};

fn object_schema(tool: &Tool, type_name: fn(ParamType) -> String, object: &str) -> Value {
    let mut properties = Map::new();
    for param in &tool.parameters {
        properties.insert(
            param.name.clone(),
            json!({
                "type": type_name(param.param_type),
                "description": param.description,
            }),
        );
    }

    json!({
        "type": object,
        "properties": properties,
        "required": tool.required_parameters(),
    })
}

fn lower(param_type: ParamType) -> String {
    param_type.as_str().to_string()
}

fn upper(param_type: ParamType) -> String {
    param_type.as_str().to_uppercase()
}

/// OpenAI-style `functions` wrapper, also accepted by Ollama
pub fn tools_to_openai_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": object_schema(tool, lower, "object"),
                }
            })
        })
        .collect()
}

/// Anthropic `tools` array with `input_schema`
pub fn tools_to_anthropic_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": object_schema(tool, lower, "object"),
            })
        })
        .collect()
}

/// Gemini `functionDeclarations` with upper-case OpenAPI types.
///
/// Returns the whole `tools` array, which is empty when there is nothing to declare.
pub fn tools_to_gemini_spec(tools: &[Tool]) -> Vec<Value> {
    if tools.is_empty() {
        return Vec::new();
    }

    let declarations: Vec<Value> = tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": object_schema(tool, upper, "OBJECT"),
            })
        })
        .collect();

    vec![json!({ "functionDeclarations": declarations })]
}
