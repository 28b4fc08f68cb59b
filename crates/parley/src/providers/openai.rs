use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::base::{CallOptions, Completion, Provider, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    check_status, for_each_line, http_client, parse_arguments, sanitize_function_name, sse_data,
    token_count, vendor_error,
};
use crate::errors::{AgentError, AgentResult};
use crate::models::conversation::Conversation;
use crate::models::role::Role;
use crate::models::tool::ToolCall;
use crate::tools::convert::tools_to_openai_spec;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

/// Convert the conversation to OpenAI chat messages, system prompt first
pub fn messages_to_openai_spec(conversation: &Conversation, system: Option<&str>) -> Vec<Value> {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    if let Some(system) = system {
        messages.push(json!({"role": "system", "content": system}));
    }

    for message in conversation {
        let converted = match message.role {
            Role::Assistant if message.has_tool_calls() => {
                let calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": Value::Object(call.arguments.clone()).to_string(),
                            }
                        })
                    })
                    .collect();
                let content = message.content.as_deref().filter(|t| !t.is_empty());
                json!({"role": "assistant", "content": content, "tool_calls": calls})
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": message.tool_call_id,
                "content": message.text(),
            }),
            role => json!({"role": role.as_str(), "content": message.text()}),
        };
        messages.push(converted);
    }
    messages
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Reassembles a streamed chat completion from its SSE `data:` lines.
///
/// Tool calls arrive as fragments keyed by index: the first carries id and name,
/// the rest append to the argument JSON.
#[derive(Debug, Default)]
pub struct ChatStreamAssembler {
    text: String,
    calls: BTreeMap<u64, PartialCall>,
    usage: Usage,
}

impl ChatStreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one line, returning the text it added
    pub fn feed_line(&mut self, line: &str) -> AgentResult<Option<String>> {
        let Some(data) = sse_data(line) else {
            return Ok(None);
        };
        let event: Value = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("skipping malformed openai event: {}", e);
                return Ok(None);
            }
        };
        if let Some(message) = vendor_error(&event) {
            return Err(AgentError::Protocol(message));
        }

        if let Some(usage) = event.get("usage").filter(|u| u.is_object()) {
            self.usage = Usage::new(
                token_count(usage, "prompt_tokens"),
                token_count(usage, "completion_tokens"),
                token_count(usage, "total_tokens"),
            );
        }

        let Some(delta) = event.pointer("/choices/0/delta") else {
            return Ok(None);
        };

        if let Some(fragments) = delta.get("tool_calls").and_then(|c| c.as_array()) {
            for fragment in fragments {
                let index = fragment.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let call = self.calls.entry(index).or_default();
                if let Some(id) = fragment.get("id").and_then(|id| id.as_str()) {
                    call.id = Some(id.to_string());
                }
                if let Some(function) = fragment.get("function") {
                    if let Some(name) = function.get("name").and_then(|n| n.as_str()) {
                        call.name.push_str(name);
                    }
                    if let Some(arguments) = function.get("arguments").and_then(|a| a.as_str()) {
                        call.arguments.push_str(arguments);
                    }
                }
            }
        }

        match delta.get("content").and_then(|c| c.as_str()) {
            Some(piece) if !piece.is_empty() => {
                self.text.push_str(piece);
                Ok(Some(piece.to_string()))
            }
            _ => Ok(None),
        }
    }

    pub fn finish(self) -> Completion {
        let tool_calls = self
            .calls
            .into_values()
            .filter(|call| !call.name.is_empty())
            .map(|call| {
                ToolCall::new(
                    call.id,
                    sanitize_function_name(&call.name),
                    parse_arguments(&Value::String(call.arguments)),
                )
            })
            .collect();
        Completion {
            text: self.text,
            tool_calls,
            usage: self.usage,
        }
    }
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> AgentResult<Self> {
        let client = http_client()?;
        Ok(Self { client, config })
    }

    fn payload(&self, conversation: &Conversation, options: &CallOptions<'_>) -> Value {
        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_to_openai_spec(conversation, options.system()),
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if !options.tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_spec(options.tools));
        }
        if let Some(temperature) = self.config.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        payload
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
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
            return Err(AgentError::missing_credential("openai", "OPENAI_API_KEY"));
        }
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );
        tracing::debug!(model = %self.config.model, messages = conversation.len(), "calling openai");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&self.payload(conversation, options))
            .send()
            .await?;
        let response = check_status(response).await?;

        let mut assembler = ChatStreamAssembler::new();
        for_each_line(response, |line| {
            if let Some(piece) = assembler.feed_line(line)? {
                options.emit(&piece);
            }
            Ok(())
        })
        .await?;
        Ok(assembler.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;
    use crate::providers::utils::test_support::all_splits;
    use crate::providers::utils::LineBuffer;
    use crate::tools::catalog::builtin_tools;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(events: &[Value]) -> String {
        let mut body = String::new();
        for event in events {
            body.push_str(&format!("data: {}\n\n", event));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn text_stream() -> String {
        sse(&[
            json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}}]}),
            json!({"choices": [{"index": 0, "delta": {"content": "Héllo"}}]}),
            json!({"choices": [{"index": 0, "delta": {"content": ", world"}}]}),
            json!({"choices": [], "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}}),
        ])
    }

    fn tool_stream() -> String {
        sse(&[
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": "call_abc", "type": "function",
                 "function": {"name": "read_file", "arguments": ""}}
            ]}}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"path\":"}}
            ]}}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": " \"a.txt\"}"}}
            ]}}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 1, "id": "call_def", "function": {"name": "list_files", "arguments": "{}"}}
            ]}}]}),
        ])
    }

    fn assemble(chunks: &[&[u8]]) -> AgentResult<Completion> {
        let mut lines = LineBuffer::new();
        let mut assembler = ChatStreamAssembler::new();
        for chunk in chunks {
            for line in lines.push(chunk) {
                assembler.feed_line(&line)?;
            }
        }
        if let Some(line) = lines.finish() {
            assembler.feed_line(&line)?;
        }
        Ok(assembler.finish())
    }

    #[test]
    fn test_text_stream_chunking_invariance() -> AgentResult<()> {
        let body = text_stream();
        for chunks in all_splits(body.as_bytes()) {
            let completion = assemble(&chunks)?;
            assert_eq!(completion.text, "Héllo, world");
            assert_eq!(completion.usage.total_tokens, Some(12));
        }
        Ok(())
    }

    #[test]
    fn test_tool_call_fragments_accumulate_by_index() -> AgentResult<()> {
        let body = tool_stream();
        for chunks in all_splits(body.as_bytes()) {
            let completion = assemble(&chunks)?;
            assert_eq!(completion.text, "");
            assert_eq!(completion.tool_calls.len(), 2);
            assert_eq!(completion.tool_calls[0].id.as_deref(), Some("call_abc"));
            assert_eq!(completion.tool_calls[0].name, "read_file");
            assert_eq!(completion.tool_calls[0].str_arg("path"), Some("a.txt"));
            assert_eq!(completion.tool_calls[1].name, "list_files");
            assert!(completion.tool_calls[1].arguments.is_empty());
        }
        Ok(())
    }

    #[test]
    fn test_error_event_fails() {
        let mut assembler = ChatStreamAssembler::new();
        let result = assembler.feed_line(r#"data: {"error": {"message": "overloaded"}}"#);
        assert_eq!(result, Err(AgentError::Protocol("overloaded".into())));
    }

    #[test]
    fn test_messages_to_openai_spec() {
        let mut conversation = Conversation::new();
        conversation.push(Message::user().with_text("read a.txt"));
        conversation.push(Message::assistant().with_tool_call(ToolCall::from_value(
            Some("call_1".into()),
            "read_file",
            json!({"path": "a.txt"}),
        )));
        conversation.push(Message::tool("call_1").with_text("contents"));
        conversation.push(Message::assistant().with_text("It says contents."));

        let spec = messages_to_openai_spec(&conversation, None);
        assert_eq!(spec.len(), 4);
        assert_eq!(spec[0], json!({"role": "user", "content": "read a.txt"}));
        assert_eq!(spec[1]["content"], Value::Null);
        assert_eq!(spec[1]["tool_calls"][0]["id"], "call_1");
        assert_eq!(
            spec[1]["tool_calls"][0]["function"]["arguments"],
            "{\"path\":\"a.txt\"}"
        );
        assert_eq!(
            spec[2],
            json!({"role": "tool", "tool_call_id": "call_1", "content": "contents"})
        );
        assert_eq!(spec[3]["role"], "assistant");
    }

    #[tokio::test]
    async fn test_call_streams_text() -> AgentResult<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test_api_key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(text_stream()),
            )
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(OpenAiProviderConfig {
            host: server.uri(),
            ..OpenAiProviderConfig::new("test_api_key")
        })?;
        let mut conversation = Conversation::new();
        conversation.push(Message::user().with_text("hello"));
        let tools = builtin_tools();

        let completion = provider
            .call(
                &conversation,
                &CallOptions::new(&tools).with_system_prompt("be brief"),
            )
            .await?;
        assert_eq!(completion.text, "Héllo, world");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_request() {
        let provider = OpenAiProvider::new(OpenAiProviderConfig {
            host: "http://127.0.0.1:9".to_string(),
            ..OpenAiProviderConfig::new("")
        })
        .unwrap();
        let result = provider
            .call(&Conversation::new(), &CallOptions::default())
            .await;
        assert!(matches!(result, Err(AgentError::Configuration(_))));
    }
}
