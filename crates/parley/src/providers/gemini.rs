use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::base::{CallOptions, Completion, Provider, Usage};
use super::configs::GeminiProviderConfig;
use super::utils::{check_status, http_client, parse_arguments, token_count, vendor_error};
use crate::errors::{AgentError, AgentResult};
use crate::models::conversation::Conversation;
use crate::models::role::Role;
use crate::models::tool::ToolCall;
use crate::tools::convert::tools_to_gemini_spec;

pub struct GeminiProvider {
    client: Client,
    config: GeminiProviderConfig,
}

/// Convert the conversation to Gemini `contents`.
///
/// The assistant is called `model` here, and tool results are `functionResponse`
/// parts addressed by function name rather than call id.
pub fn messages_to_gemini_spec(conversation: &Conversation) -> Vec<Value> {
    let mut contents: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for message in conversation {
        let (role, parts) = match message.role {
            Role::User => ("user", vec![json!({"text": message.text()})]),
            Role::Assistant => {
                let mut parts = Vec::new();
                if !message.text().is_empty() {
                    parts.push(json!({"text": message.text()}));
                }
                for call in &message.tool_calls {
                    parts.push(json!({
                        "functionCall": {"name": call.name, "args": call.arguments}
                    }));
                }
                ("model", parts)
            }
            Role::Tool => {
                let name = message
                    .tool_call_id
                    .as_deref()
                    .and_then(|id| conversation.tool_name_for(id))
                    .unwrap_or("unknown");
                (
                    "user",
                    vec![json!({
                        "functionResponse": {
                            "name": name,
                            "response": {"content": message.text()},
                        }
                    })],
                )
            }
            Role::System => continue,
        };
        if parts.is_empty() {
            continue;
        }
        match contents.last_mut() {
            Some((last_role, last_parts)) if *last_role == role => last_parts.extend(parts),
            _ => contents.push((role, parts)),
        }
    }

    contents
        .into_iter()
        .map(|(role, parts)| json!({"role": role, "parts": parts}))
        .collect()
}

/// Read a `generateContent` body; function calls take precedence over text
pub fn parse_gemini_response(body: &Value) -> AgentResult<Completion> {
    if let Some(message) = vendor_error(body) {
        return Err(AgentError::Protocol(message));
    }
    if let Some(reason) = body
        .pointer("/promptFeedback/blockReason")
        .and_then(|r| r.as_str())
    {
        return Err(AgentError::Protocol(format!(
            "gemini blocked the prompt: {}",
            reason
        )));
    }

    let usage = body
        .get("usageMetadata")
        .map(|meta| {
            Usage::new(
                token_count(meta, "promptTokenCount"),
                token_count(meta, "candidatesTokenCount"),
                token_count(meta, "totalTokenCount"),
            )
        })
        .unwrap_or_default();

    let parts = body
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .cloned()
        .unwrap_or_default();

    let tool_calls: Vec<ToolCall> = parts
        .iter()
        .filter_map(|part| {
            let call = part.get("functionCall")?;
            let name = call.get("name")?.as_str()?;
            Some(ToolCall::new(
                call.get("id").and_then(|id| id.as_str()).map(String::from),
                name,
                parse_arguments(call.get("args").unwrap_or(&Value::Null)),
            ))
        })
        .collect();
    if !tool_calls.is_empty() {
        return Ok(Completion::tool_calls(tool_calls).with_usage(usage));
    }

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect();
    Ok(Completion::text(text).with_usage(usage))
}

impl GeminiProvider {
    pub fn new(config: GeminiProviderConfig) -> AgentResult<Self> {
        let client = http_client()?;
        Ok(Self { client, config })
    }

    fn payload(&self, conversation: &Conversation, options: &CallOptions<'_>) -> Value {
        let mut payload = json!({
            "contents": messages_to_gemini_spec(conversation),
        });
        if let Some(system) = options.system() {
            payload["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        let tools = tools_to_gemini_spec(options.tools);
        if !tools.is_empty() {
            payload["tools"] = json!(tools);
        }
        if let Some(temperature) = self.config.temperature {
            payload["generationConfig"] = json!({"temperature": temperature});
        }
        payload
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn is_available(&self) -> bool {
        !self.config.api_key.trim().is_empty()
    }

    async fn call(
        &self,
        conversation: &Conversation,
        options: &CallOptions<'_>,
    ) -> AgentResult<Completion> {
        if !self.is_available() {
            return Err(AgentError::missing_credential("gemini", "GEMINI_API_KEY"));
        }
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.host.trim_end_matches('/'),
            self.config.model
        );
        tracing::debug!(model = %self.config.model, messages = conversation.len(), "calling gemini");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&self.payload(conversation, options))
            .send()
            .await?;
        let response = check_status(response).await?;
        let body = response.text().await?;
        let body: Value = serde_json::from_str(&body).map_err(|e| {
            AgentError::Protocol(format!("gemini returned an unreadable body: {}", e))
        })?;

        let completion = parse_gemini_response(&body)?;
        if !completion.has_tool_calls() {
            options.emit(&completion.text);
        }
        Ok(completion)
    }
}
