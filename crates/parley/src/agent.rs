use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::errors::{AgentResult, ToolError};
use crate::models::conversation::{Checkpoint, Conversation};
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall, ToolCallResult};
use crate::providers::base::{CallOptions, OutputSink, Provider};
use crate::providers::configs::AgentConfig;
use crate::providers::factory::get_provider;
use crate::tools::ToolExecutor;

/// Model calls allowed per turn before giving up on a final answer
pub const MAX_TOOL_ROUNDS: usize = 5;

/// Notified of each tool call just before it runs
pub trait ToolObserver: Send + Sync {
    fn on_tool_call(&self, call: &ToolCall);
}

impl<F> ToolObserver for F
where
    F: Fn(&ToolCall) + Send + Sync,
{
    fn on_tool_call(&self, call: &ToolCall) {
        self(call)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Do not mirror model text to the output sink
    pub silent: bool,
}

impl SendOptions {
    pub fn silent() -> Self {
        Self { silent: true }
    }
}

/// Rolls the conversation back to where the turn began unless committed,
/// including when the turn's future is dropped mid-flight
struct Turn<'a> {
    conversation: &'a mut Conversation,
    checkpoint: Checkpoint,
    committed: bool,
}

impl<'a> Turn<'a> {
    fn begin(conversation: &'a mut Conversation) -> Self {
        let checkpoint = conversation.checkpoint();
        Self {
            conversation,
            checkpoint,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Deref for Turn<'_> {
    type Target = Conversation;

    fn deref(&self) -> &Conversation {
        self.conversation
    }
}

impl DerefMut for Turn<'_> {
    fn deref_mut(&mut self) -> &mut Conversation {
        self.conversation
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let removed = self.conversation.rollback(self.checkpoint);
            tracing::debug!(removed, "rolled back unfinished turn");
        }
    }
}

/// Give id-less calls a synthetic id so tool results can always be matched up
fn ensure_id(mut call: ToolCall) -> ToolCall {
    if call.id.as_deref().map_or(true, |id| id.trim().is_empty()) {
        call.id = Some(format!("call_{}", uuid::Uuid::new_v4().simple()));
    }
    call
}

/// Agent pairs one backend with one conversation and runs the tool-calling loop
pub struct Agent {
    provider: Box<dyn Provider>,
    executor: Option<Arc<dyn ToolExecutor>>,
    conversation: Conversation,
    system_prompt: Option<String>,
    sink: Option<Arc<dyn OutputSink>>,
    observer: Option<Arc<dyn ToolObserver>>,
    max_rounds: usize,
}

impl Agent {
    /// Create a new Agent with the specified provider
    pub fn new(provider: Box<dyn Provider>) -> Self {
        Self {
            provider,
            executor: None,
            conversation: Conversation::new(),
            system_prompt: None,
            sink: None,
            observer: None,
            max_rounds: MAX_TOOL_ROUNDS,
        }
    }

    /// Build the provider named by `config` and wrap it in an agent
    pub fn from_config(config: AgentConfig) -> AgentResult<Self> {
        let provider = get_provider(config.provider)?;
        let mut agent = Self::new(provider).with_max_rounds(config.max_rounds);
        agent.system_prompt = config.system_prompt.filter(|s| !s.trim().is_empty());
        Ok(agent)
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_system_prompt<S: Into<String>>(mut self, system_prompt: S) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ToolObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Cap on model calls per turn; at least one call is always made
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Tools offered to the model; none when the backend can't take them
    pub fn tools(&self) -> &[Tool] {
        match &self.executor {
            Some(executor) if self.provider.supports_tools() => executor.tools(),
            _ => &[],
        }
    }

    /// Run one turn: send `message`, execute any tools the model asks for, and
    /// return its final text.
    ///
    /// On error the conversation is restored to its length before the call. If the
    /// model is still asking for tools after the last allowed round the result is
    /// an empty string and the tool results stay in history.
    pub async fn send(&mut self, message: &str, options: SendOptions) -> AgentResult<String> {
        let tools = self.tools().to_vec();
        let Agent {
            provider,
            executor,
            conversation,
            system_prompt,
            sink,
            observer,
            max_rounds,
        } = self;

        let mut call_options = CallOptions::new(&tools).silent(options.silent);
        if let Some(system) = system_prompt.as_deref() {
            call_options = call_options.with_system_prompt(system);
        }
        if let Some(sink) = sink.as_deref() {
            call_options = call_options.with_sink(sink);
        }

        let mut turn = Turn::begin(conversation);
        turn.push(Message::user().with_text(message));

        for round in 1..=*max_rounds {
            tracing::debug!(provider = provider.name(), round, "awaiting model");
            let completion = match provider.call(&turn, &call_options).await {
                Ok(completion) => completion,
                Err(e) => {
                    tracing::warn!(provider = provider.name(), round, "turn failed: {}", e);
                    return Err(e);
                }
            };

            if !completion.has_tool_calls() {
                turn.push(Message::assistant().with_text(completion.text.clone()));
                turn.commit();
                return Ok(completion.text);
            }

            let calls: Vec<ToolCall> = completion.tool_calls.into_iter().map(ensure_id).collect();
            let mut request = Message::assistant().with_tool_calls(calls.clone());
            if !completion.text.is_empty() {
                request = request.with_text(completion.text);
            }
            turn.push(request);

            for call in calls {
                if let Some(observer) = observer.as_deref() {
                    observer.on_tool_call(&call);
                }
                tracing::info!(tool = %call.name, round, "executing tool");
                let output = match executor.as_deref() {
                    Some(executor) => executor.execute(&call).await,
                    None => ToolError::ToolNotFound(call.name.clone()).to_tool_output(),
                };
                let result = ToolCallResult::new(call.id.unwrap_or_default(), output);
                turn.push(result.into());
            }
        }

        tracing::warn!(
            max_rounds = *max_rounds,
            "model still wanted tools after the last round, giving up on this turn"
        );
        turn.commit();
        Ok(String::new())
    }

    /// Hand the terminal to the backend's own interactive mode, if it has one
    pub async fn interactive(&self, prompt: Option<&str>) -> AgentResult<()> {
        self.provider.interactive(prompt).await
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn message_count(&self) -> usize {
        self.conversation.len()
    }

    pub fn turn_count(&self) -> usize {
        self.conversation.turn_count()
    }

    pub fn clear_history(&mut self) {
        self.conversation.clear();
    }
}
