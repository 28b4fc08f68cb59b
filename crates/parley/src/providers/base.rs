use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{AgentError, AgentResult};
use crate::models::conversation::Conversation;
use crate::models::tool::{Tool, ToolCall};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        let total_tokens = total_tokens.or(match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Receives text as a backend produces it, for live display
pub trait OutputSink: Send + Sync {
    fn write(&self, text: &str);
}

impl<F> OutputSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn write(&self, text: &str) {
        self(text)
    }
}

/// Per-call knobs handed to a provider
#[derive(Clone, Copy, Default)]
pub struct CallOptions<'a> {
    pub system_prompt: Option<&'a str>,
    pub tools: &'a [Tool],
    /// Suppress mirroring text to the sink
    pub silent: bool,
    pub sink: Option<&'a dyn OutputSink>,
}

impl<'a> CallOptions<'a> {
    pub fn new(tools: &'a [Tool]) -> Self {
        Self {
            tools,
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: &'a str) -> Self {
        self.system_prompt = Some(system_prompt);
        self
    }

    pub fn with_sink(mut self, sink: &'a dyn OutputSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Mirror text to the sink unless silenced
    pub fn emit(&self, text: &str) {
        if self.silent || text.is_empty() {
            return;
        }
        if let Some(sink) = self.sink {
            sink.write(text);
        }
    }

    /// The system prompt, if one was given and is not blank
    pub fn system(&self) -> Option<&'a str> {
        self.system_prompt.filter(|s| !s.trim().is_empty())
    }
}

/// The canonical outcome of one provider call.
///
/// When `tool_calls` is non-empty the model wants tools run; `text` then holds
/// whatever commentary came along with the calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

impl Completion {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Base trait for model backends (CLI agents, Ollama, OpenAI, Anthropic, Gemini)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &str;

    /// Whether this backend can be offered tools at all
    fn supports_tools(&self) -> bool {
        true
    }

    /// Whether the backend looks usable: credentials present, executable found
    fn is_available(&self) -> bool;

    /// Send the conversation and parse the reply into canonical form
    async fn call(
        &self,
        conversation: &Conversation,
        options: &CallOptions<'_>,
    ) -> AgentResult<Completion>;

    /// Hand the terminal over to the backend, without capturing anything
    async fn interactive(&self, _prompt: Option<&str>) -> AgentResult<()> {
        Err(AgentError::Configuration(format!(
            "{} has no interactive mode",
            self.name()
        )))
    }
}
