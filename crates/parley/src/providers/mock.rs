use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;

use crate::errors::AgentResult;
use crate::models::conversation::Conversation;
use crate::models::message::Message;
use crate::providers::base::{CallOptions, Completion, Provider};

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    responses: Arc<Mutex<Vec<AgentResult<Completion>>>>,
    fallback: Option<Completion>,
    supports_tools: bool,
    calls: Arc<Mutex<Vec<Vec<Message>>>>,
    tool_counts: Arc<Mutex<Vec<usize>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<AgentResult<Completion>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            fallback: None,
            supports_tools: true,
            calls: Arc::new(Mutex::new(Vec::new())),
            tool_counts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A provider that gives the same answer forever
    pub fn always(completion: Completion) -> Self {
        Self {
            fallback: Some(completion),
            ..Self::new(Vec::new())
        }
    }

    pub fn without_tools(mut self) -> Self {
        self.supports_tools = false;
        self
    }

    /// The conversation as each call saw it
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }

    /// How many tools each call was offered
    pub fn tool_counts(&self) -> Vec<usize> {
        self.tool_counts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn supports_tools(&self) -> bool {
        self.supports_tools
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn call(
        &self,
        conversation: &Conversation,
        options: &CallOptions<'_>,
    ) -> AgentResult<Completion> {
        self.calls
            .lock()
            .unwrap()
            .push(conversation.messages().to_vec());
        self.tool_counts.lock().unwrap().push(options.tools.len());

        let mut responses = self.responses.lock().unwrap();
        let completion = if responses.is_empty() {
            // Return empty response if no more pre-configured responses
            Ok(self.fallback.clone().unwrap_or_default())
        } else {
            responses.remove(0)
        };
        if let Ok(completion) = &completion {
            options.emit(&completion.text);
        }
        completion
    }
}
