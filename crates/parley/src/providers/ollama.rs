use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::base::{CallOptions, Completion, Provider, Usage};
use super::configs::OllamaProviderConfig;
use super::utils::{
    check_status, for_each_line, http_client, parse_arguments, sanitize_function_name,
    token_count, vendor_error,
};
use crate::errors::{AgentError, AgentResult};
use crate::models::conversation::Conversation;
use crate::models::role::Role;
use crate::models::tool::ToolCall;
use crate::tools::convert::tools_to_openai_spec;

pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
}

/// Convert the conversation into Ollama chat messages.
///
/// Ollama takes tool arguments as objects and matches tool results by position,
/// so no call ids are sent.
pub fn messages_to_ollama_spec(conversation: &Conversation, system: Option<&str>) -> Vec<Value> {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    if let Some(system) = system {
        messages.push(json!({"role": "system", "content": system}));
    }

    for message in conversation {
        let mut converted = json!({
            "role": message.role.as_str(),
            "content": message.text(),
        });
        if message.role == Role::Assistant && message.has_tool_calls() {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments,
                        }
                    })
                })
                .collect();
            converted["tool_calls"] = json!(calls);
        }
        messages.push(converted);
    }
    messages
}

fn tool_calls_from(message: &Value) -> Vec<ToolCall> {
    message
        .get("tool_calls")
        .and_then(|calls| calls.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let function = call.get("function")?;
                    let name = function.get("name")?.as_str()?;
                    let arguments = function.get("arguments").unwrap_or(&Value::Null);
                    Some(ToolCall::new(
                        call.get("id").and_then(|id| id.as_str()).map(String::from),
                        sanitize_function_name(name),
                        parse_arguments(arguments),
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn usage_from(value: &Value) -> Usage {
    Usage::new(
        token_count(value, "prompt_eval_count"),
        token_count(value, "eval_count"),
        None,
    )
}

/// Reassembles a streamed `/api/chat` body, one JSON object per line
#[derive(Debug, Default)]
pub struct NdjsonAssembler {
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Usage,
}

impl NdjsonAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one complete line, returning the text it added.
    ///
    /// Lines that are not JSON are skipped; an object with an `error` field ends the call.
    pub fn feed_line(&mut self, line: &str) -> AgentResult<Option<String>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("skipping malformed ollama line: {}", e);
                return Ok(None);
            }
        };
        if let Some(message) = vendor_error(&value) {
            return Err(AgentError::Protocol(message));
        }

        if value.get("done").and_then(|d| d.as_bool()).unwrap_or(false) {
            self.usage = usage_from(&value);
        }

        let Some(message) = value.get("message") else {
            return Ok(None);
        };
        self.tool_calls.extend(tool_calls_from(message));

        match message.get("content").and_then(|c| c.as_str()) {
            Some(piece) if !piece.is_empty() => {
                self.text.push_str(piece);
                Ok(Some(piece.to_string()))
            }
            _ => Ok(None),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn finish(self) -> Completion {
        Completion {
            text: self.text,
            tool_calls: self.tool_calls,
            usage: self.usage,
        }
    }
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig) -> AgentResult<Self> {
        let client = http_client()?;
        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!("{}/api/chat", self.config.host.trim_end_matches('/'))
    }

    fn payload(&self, conversation: &Conversation, options: &CallOptions<'_>) -> Value {
        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_to_ollama_spec(conversation, options.system()),
            "stream": options.tools.is_empty(),
        });
        if !options.tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_spec(options.tools));
        }
        if let Some(temperature) = self.config.temperature {
            payload["options"] = json!({"temperature": temperature});
        }
        payload
    }

    async fn stream(&self, payload: Value, options: &CallOptions<'_>) -> AgentResult<Completion> {
        let response = self.client.post(self.url()).json(&payload).send().await?;
        let response = check_status(response).await?;

        let mut assembler = NdjsonAssembler::new();
        for_each_line(response, |line| {
            if let Some(piece) = assembler.feed_line(line)? {
                options.emit(&piece);
            }
            Ok(())
        })
        .await?;
        Ok(assembler.finish())
    }

    async fn complete(&self, payload: Value, options: &CallOptions<'_>) -> AgentResult<Completion> {
        let response = self.client.post(self.url()).json(&payload).send().await?;
        let response = check_status(response).await?;
        let body = response.text().await?;

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            AgentError::Protocol(format!("ollama returned an unreadable body: {}", e))
        })?;
        if let Some(message) = vendor_error(&value) {
            return Err(AgentError::Protocol(message));
        }

        let message = value.get("message").cloned().unwrap_or(Value::Null);
        let tool_calls = tool_calls_from(&message);
        if !tool_calls.is_empty() {
            return Ok(Completion::tool_calls(tool_calls).with_usage(usage_from(&value)));
        }

        let text = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();
        options.emit(&text);
        Ok(Completion::text(text).with_usage(usage_from(&value)))
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn is_available(&self) -> bool {
        !self.config.host.trim().is_empty()
    }

    async fn call(
        &self,
        conversation: &Conversation,
        options: &CallOptions<'_>,
    ) -> AgentResult<Completion> {
        let payload = self.payload(conversation, options);
        tracing::debug!(
            model = %self.config.model,
            messages = conversation.len(),
            tools = options.tools.len(),
            "calling ollama"
        );
        if options.tools.is_empty() {
            self.stream(payload, options).await
        } else {
            self.complete(payload, options).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;
    use crate::providers::utils::test_support::{all_splits, chunks_of};
    use crate::providers::utils::LineBuffer;
    use crate::tools::catalog::builtin_tools;
    use std::sync::Mutex;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HELLO: &str = "{\"message\":{\"content\":\"Hel\"}}\n{\"message\":{\"content\":\"lo\"}}\n";

    fn assemble(chunks: &[&[u8]]) -> AgentResult<String> {
        let mut lines = LineBuffer::new();
        let mut assembler = NdjsonAssembler::new();
        for chunk in chunks {
            for line in lines.push(chunk) {
                assembler.feed_line(&line)?;
            }
        }
        if let Some(line) = lines.finish() {
            assembler.feed_line(&line)?;
        }
        Ok(assembler.finish().text)
    }

    fn provider(host: String) -> AgentResult<OllamaProvider> {
        OllamaProvider::new(OllamaProviderConfig {
            host,
            model: "llama3.1".to_string(),
            temperature: None,
        })
    }

    #[test]
    fn test_ndjson_pieces_concatenate() -> AgentResult<()> {
        assert_eq!(assemble(&[HELLO.as_bytes()])?, "Hello");
        Ok(())
    }

    #[test]
    fn test_ndjson_chunking_invariance() -> AgentResult<()> {
        let body = format!(
            "{}{}",
            HELLO, "{\"message\":{\"content\":\", wörld ✓\"}}\n{\"done\":true,\"eval_count\":3}"
        );
        for chunks in all_splits(body.as_bytes()) {
            assert_eq!(assemble(&chunks)?, "Hello, wörld ✓");
        }
        for step in 1..6 {
            assert_eq!(assemble(&chunks_of(body.as_bytes(), step))?, "Hello, wörld ✓");
        }
        Ok(())
    }

    #[test]
    fn test_ndjson_error_line_fails() {
        let body = b"{\"message\":{\"content\":\"Hi\"}}\n{\"error\":\"model crashed\"}\n";
        let result = assemble(&[body]);
        assert_eq!(result, Err(AgentError::Protocol("model crashed".into())));
    }

    #[test]
    fn test_ndjson_null_error_field_is_ignored() -> AgentResult<()> {
        let body = b"{\"message\":{\"content\":\"Hi\"},\"error\":null}\n{\"done\":true}\n";
        assert_eq!(assemble(&[body])?, "Hi");
        Ok(())
    }

    #[test]
    fn test_ndjson_skips_malformed_lines() -> AgentResult<()> {
        let body = b"{\"message\":{\"content\":\"a\"}}\nnot json\n{\"message\":{\"content\":\"b\"}}\n";
        assert_eq!(assemble(&[body])?, "ab");
        Ok(())
    }

    #[test]
    fn test_ndjson_usage_from_done_line() -> AgentResult<()> {
        let mut assembler = NdjsonAssembler::new();
        assembler.feed_line(r#"{"done":true,"prompt_eval_count":12,"eval_count":5}"#)?;
        let completion = assembler.finish();
        assert_eq!(completion.usage, Usage::new(Some(12), Some(5), None));
        assert_eq!(completion.usage.total_tokens, Some(17));
        Ok(())
    }

    #[test]
    fn test_messages_to_ollama_spec() {
        let mut conversation = Conversation::new();
        conversation.push(Message::user().with_text("list files"));
        conversation.push(Message::assistant().with_tool_call(ToolCall::from_value(
            Some("call_1".into()),
            "list_files",
            json!({}),
        )));
        conversation.push(Message::tool("call_1").with_text("a.txt"));

        let spec = messages_to_ollama_spec(&conversation, Some("be brief"));
        assert_eq!(spec.len(), 4);
        assert_eq!(spec[0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(spec[2]["tool_calls"][0]["function"]["name"], "list_files");
        assert_eq!(spec[2]["tool_calls"][0]["function"]["arguments"], json!({}));
        assert_eq!(spec[3], json!({"role": "tool", "content": "a.txt"}));
    }

    #[tokio::test]
    async fn test_streaming_call_mirrors_tokens() -> AgentResult<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"stream": true, "model": "llama3.1"})))
            .respond_with(ResponseTemplate::new(200).set_body_string(HELLO))
            .mount(&server)
            .await;

        let provider = provider(server.uri())?;
        let mut conversation = Conversation::new();
        conversation.push(Message::user().with_text("hi"));

        let seen = Mutex::new(Vec::new());
        let sink = |text: &str| seen.lock().unwrap().push(text.to_string());
        let completion = provider
            .call(&conversation, &CallOptions::default().with_sink(&sink))
            .await?;

        assert_eq!(completion.text, "Hello");
        assert!(completion.tool_calls.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec!["Hel", "lo"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_call_uses_single_body() -> AgentResult<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [
                        {"function": {"name": "read_file", "arguments": {"path": "a.txt"}}}
                    ]
                },
                "done": true,
                "prompt_eval_count": 20,
                "eval_count": 4
            })))
            .mount(&server)
            .await;

        let provider = provider(server.uri())?;
        let mut conversation = Conversation::new();
        conversation.push(Message::user().with_text("show a.txt"));
        let tools = builtin_tools();

        let completion = provider.call(&conversation, &CallOptions::new(&tools)).await?;
        assert_eq!(completion.tool_calls.len(), 1);
        let call = &completion.tool_calls[0];
        assert_eq!(call.id, None);
        assert_eq!(call.name, "read_file");
        assert_eq!(call.str_arg("path"), Some("a.txt"));
        assert_eq!(completion.usage.total_tokens, Some(24));
        Ok(())
    }

    #[tokio::test]
    async fn test_error_status_is_protocol_error() -> AgentResult<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"error": "model \"nope\" not found"})),
            )
            .mount(&server)
            .await;

        let provider = provider(server.uri())?;
        let mut conversation = Conversation::new();
        conversation.push(Message::user().with_text("hi"));

        let err = provider
            .call(&conversation, &CallOptions::default())
            .await
            .unwrap_err();
        match err {
            AgentError::Protocol(message) => {
                assert!(message.contains("404"));
                assert!(message.contains("not found"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        Ok(())
    }
}
