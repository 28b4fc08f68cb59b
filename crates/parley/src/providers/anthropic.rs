use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::base::{CallOptions, Completion, Provider, Usage};
use super::configs::AnthropicProviderConfig;
use super::utils::{check_status, for_each_line, http_client, sse_data};
use crate::errors::{AgentError, AgentResult};
use crate::models::conversation::Conversation;
use crate::models::role::Role;
use crate::models::tool::ToolCall;
use crate::tools::convert::tools_to_anthropic_spec;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

/// Convert the conversation to Messages API turns.
///
/// Tool results travel as `tool_result` blocks in a user turn, and consecutive
/// turns of the same role are merged since the API requires alternation.
pub fn messages_to_anthropic_spec(conversation: &Conversation) -> Vec<Value> {
    let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for message in conversation {
        let (role, blocks) = match message.role {
            Role::Tool => (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id,
                    "content": message.text(),
                })],
            ),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !message.text().is_empty() {
                    blocks.push(json!({"type": "text", "text": message.text()}));
                }
                for call in &message.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    }));
                }
                ("assistant", blocks)
            }
            // The system prompt is sent top-level, never as a turn
            Role::System => continue,
            Role::User => (
                "user",
                vec![json!({"type": "text", "text": message.text()})],
            ),
        };
        if blocks.is_empty() {
            continue;
        }
        match turns.last_mut() {
            Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
            _ => turns.push((role, blocks)),
        }
    }

    turns
        .into_iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Event {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageStart },
    #[serde(rename = "content_block_start")]
    ContentBlockStart { content_block: ContentBlock },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: BlockDelta },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop {},
    #[serde(rename = "message_delta")]
    MessageDelta {
        #[serde(default)]
        usage: Option<TokenUsage>,
    },
    #[serde(rename = "error")]
    Error { error: ErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenUsage {
    input_tokens: Option<i32>,
    output_tokens: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum BlockDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug)]
struct PendingToolUse {
    id: String,
    name: String,
    json: String,
}

/// State machine over a Messages API event stream.
///
/// A `tool_use` block start opens an accumulator; `input_json_delta` fragments are
/// buffered raw and only parsed once the block stops.
#[derive(Debug, Default)]
pub struct MessageStreamAssembler {
    text: String,
    pending: Option<PendingToolUse>,
    tool_calls: Vec<ToolCall>,
    input_tokens: Option<i32>,
    output_tokens: Option<i32>,
}

impl MessageStreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one line, returning the text it added
    pub fn feed_line(&mut self, line: &str) -> AgentResult<Option<String>> {
        let Some(data) = sse_data(line) else {
            return Ok(None);
        };
        let event: Event = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("skipping malformed anthropic event: {}", e);
                return Ok(None);
            }
        };

        match event {
            Event::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.input_tokens = usage.input_tokens;
                    self.output_tokens = usage.output_tokens;
                }
                Ok(None)
            }
            Event::ContentBlockStart { content_block } => match content_block {
                ContentBlock::ToolUse { id, name } => {
                    self.pending = Some(PendingToolUse {
                        id,
                        name,
                        json: String::new(),
                    });
                    Ok(None)
                }
                ContentBlock::Text { text } => Ok(self.push_text(text)),
                ContentBlock::Other => Ok(None),
            },
            Event::ContentBlockDelta { delta } => match delta {
                BlockDelta::TextDelta { text } => Ok(self.push_text(text)),
                BlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(pending) = self.pending.as_mut() {
                        pending.json.push_str(&partial_json);
                    }
                    Ok(None)
                }
                BlockDelta::Other => Ok(None),
            },
            Event::ContentBlockStop {} => {
                if let Some(pending) = self.pending.take() {
                    self.tool_calls.push(finish_tool_use(pending));
                }
                Ok(None)
            }
            Event::MessageDelta { usage } => {
                if let Some(output) = usage.and_then(|u| u.output_tokens) {
                    self.output_tokens = Some(output);
                }
                Ok(None)
            }
            Event::Error { error } => Err(AgentError::Protocol(error.message)),
            Event::Other => Ok(None),
        }
    }

    fn push_text(&mut self, text: String) -> Option<String> {
        if text.is_empty() {
            return None;
        }
        self.text.push_str(&text);
        Some(text)
    }

    pub fn finish(mut self) -> Completion {
        // A block the stream never closed still counts
        if let Some(pending) = self.pending.take() {
            self.tool_calls.push(finish_tool_use(pending));
        }
        Completion {
            text: self.text,
            tool_calls: self.tool_calls,
            usage: Usage::new(self.input_tokens, self.output_tokens, None),
        }
    }
}

fn finish_tool_use(pending: PendingToolUse) -> ToolCall {
    let arguments = if pending.json.trim().is_empty() {
        Map::new()
    } else {
        match serde_json::from_str::<Value>(&pending.json) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => {
                tracing::debug!(tool = %pending.name, "tool input was not valid JSON: {}", e);
                Map::new()
            }
        }
    };
    ToolCall::new(Some(pending.id), pending.name, arguments)
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> AgentResult<Self> {
        let client = http_client()?;
        Ok(Self { client, config })
    }

    fn payload(&self, conversation: &Conversation, options: &CallOptions<'_>) -> Value {
        let mut payload = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": messages_to_anthropic_spec(conversation),
            "stream": true,
        });
        if let Some(system) = options.system() {
            payload["system"] = json!(system);
        }
        if !options.tools.is_empty() {
            payload["tools"] = json!(tools_to_anthropic_spec(options.tools));
        }
        if let Some(temperature) = self.config.temperature {
            payload["temperature"] = json!(temperature);
        }
        payload
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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
            return Err(AgentError::missing_credential(
                "anthropic",
                "ANTHROPIC_API_KEY",
            ));
        }
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));
        tracing::debug!(model = %self.config.model, messages = conversation.len(), "calling anthropic");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.payload(conversation, options))
            .send()
            .await?;
        let response = check_status(response).await?;

        let mut assembler = MessageStreamAssembler::new();
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
    use crate::providers::utils::test_support::{all_splits, chunks_of};
    use crate::providers::utils::LineBuffer;
    use crate::tools::catalog::builtin_tools;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(events: &[Value]) -> String {
        events
            .iter()
            .map(|event| format!("event: {}\ndata: {}\n\n", event["type"].as_str().unwrap_or(""), event))
            .collect()
    }

    fn tool_use_stream() -> String {
        sse(&[
            json!({"type": "message_start", "message": {"id": "msg_1", "usage": {"input_tokens": 25, "output_tokens": 1}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Let me lóok."}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "t1", "name": "read_file", "input": {}}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"path\":"}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "\"a.txt\"}"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 40}}),
            json!({"type": "message_stop"}),
        ])
    }

    fn assemble(chunks: &[&[u8]]) -> AgentResult<Completion> {
        let mut lines = LineBuffer::new();
        let mut assembler = MessageStreamAssembler::new();
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
    fn test_tool_use_assembled_from_json_deltas() -> AgentResult<()> {
        let completion = assemble(&[tool_use_stream().as_bytes()])?;
        assert_eq!(completion.text, "Let me lóok.");
        assert_eq!(completion.tool_calls.len(), 1);
        let call = &completion.tool_calls[0];
        assert_eq!(call.id.as_deref(), Some("t1"));
        assert_eq!(call.name, "read_file");
        assert_eq!(Value::Object(call.arguments.clone()), json!({"path": "a.txt"}));
        assert_eq!(completion.usage, Usage::new(Some(25), Some(40), None));
        Ok(())
    }

    #[test]
    fn test_chunking_invariance() -> AgentResult<()> {
        let body = tool_use_stream();
        let expected = assemble(&[body.as_bytes()])?;
        for chunks in all_splits(body.as_bytes()) {
            assert_eq!(assemble(&chunks)?, expected);
        }
        for step in 1..5 {
            assert_eq!(assemble(&chunks_of(body.as_bytes(), step))?, expected);
        }
        Ok(())
    }

    #[test]
    fn test_invalid_tool_json_becomes_empty_arguments() -> AgentResult<()> {
        let body = sse(&[
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "t2", "name": "list_files"}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "{\"path\": "}}),
            json!({"type": "content_block_stop", "index": 0}),
        ]);
        let completion = assemble(&[body.as_bytes()])?;
        assert_eq!(completion.tool_calls.len(), 1);
        assert!(completion.tool_calls[0].arguments.is_empty());
        Ok(())
    }

    #[test]
    fn test_error_event_fails() {
        let body = sse(&[
            json!({"type": "message_start", "message": {"id": "msg_1"}}),
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        ]);
        assert_eq!(
            assemble(&[body.as_bytes()]),
            Err(AgentError::Protocol("Overloaded".into()))
        );
    }

    #[test]
    fn test_unknown_events_are_ignored() -> AgentResult<()> {
        let body = sse(&[
            json!({"type": "ping"}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "hmm"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "text_delta", "text": "ok"}}),
        ]);
        let completion = assemble(&[body.as_bytes()])?;
        assert_eq!(completion.text, "ok");
        assert!(completion.tool_calls.is_empty());
        Ok(())
    }

    #[test]
    fn test_messages_to_anthropic_spec_merges_tool_results() {
        let mut conversation = Conversation::new();
        conversation.push(Message::user().with_text("look around"));
        conversation.push(Message::assistant().with_text("Sure.").with_tool_calls(vec![
            ToolCall::from_value(Some("t1".into()), "list_files", json!({})),
            ToolCall::from_value(Some("t2".into()), "read_file", json!({"path": "a.txt"})),
        ]));
        conversation.push(Message::tool("t1").with_text("a.txt"));
        conversation.push(Message::tool("t2").with_text("hello"));

        let spec = messages_to_anthropic_spec(&conversation);
        assert_eq!(spec.len(), 3);
        assert_eq!(spec[1]["content"][0], json!({"type": "text", "text": "Sure."}));
        assert_eq!(spec[1]["content"][2]["input"], json!({"path": "a.txt"}));
        assert_eq!(spec[2]["role"], "user");
        let results = spec[2]["content"].as_array().map(Vec::len);
        assert_eq!(results, Some(2));
        assert_eq!(spec[2]["content"][1]["tool_use_id"], "t2");
    }

    #[tokio::test]
    async fn test_call_sends_headers_and_system() -> AgentResult<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({"system": "be brief", "stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(tool_use_stream()),
            )
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new(AnthropicProviderConfig {
            host: server.uri(),
            ..AnthropicProviderConfig::new("sk-ant-test")
        })?;
        let mut conversation = Conversation::new();
        conversation.push(Message::user().with_text("read a.txt"));
        let tools = builtin_tools();

        let completion = provider
            .call(
                &conversation,
                &CallOptions::new(&tools).with_system_prompt("be brief"),
            )
            .await?;
        assert_eq!(completion.tool_calls[0].str_arg("path"), Some("a.txt"));
        Ok(())
    }

    #[tokio::test]
    async fn test_error_status_carries_vendor_message() -> AgentResult<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "type": "error",
                "error": {"type": "authentication_error", "message": "invalid x-api-key"}
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new(AnthropicProviderConfig {
            host: server.uri(),
            ..AnthropicProviderConfig::new("bad")
        })?;
        let mut conversation = Conversation::new();
        conversation.push(Message::user().with_text("hi"));

        let result = provider.call(&conversation, &CallOptions::default()).await;
        assert_eq!(
            result,
            Err(AgentError::Protocol(
                "Request failed: 401 Unauthorized - invalid x-api-key".into()
            ))
        );
        Ok(())
    }
}
