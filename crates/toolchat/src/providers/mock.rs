use async_trait::async_trait;
use futures::stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{ModelEvent, ModelEventStream, ModelReply, Provider};

/// One scripted answer of the mock provider
pub enum MockStep {
    Reply(ModelReply),
    Fail(ProviderError),
    /// Raw events for `stream`, used to exercise malformed event sequences
    Events(Vec<Result<ModelEvent, ProviderError>>),
}

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    steps: Arc<Mutex<VecDeque<MockStep>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of replies
    pub fn new(replies: Vec<ModelReply>) -> Self {
        Self::with_steps(replies.into_iter().map(MockStep::Reply).collect())
    }

    pub fn with_steps(steps: Vec<MockStep>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The histories the provider was called with, in call order
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    fn next_step(&self, messages: &[Message]) -> Option<MockStep> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.steps.lock().unwrap().pop_front()
    }
}

/// Split a reply into the events a streaming provider would emit for it
pub fn reply_events(reply: ModelReply) -> Vec<ModelEvent> {
    let mut events = Vec::new();
    match reply {
        ModelReply::Text { content } => {
            // Emit the text in two chunks to exercise accumulation
            let mid = content.char_indices().nth(content.chars().count() / 2);
            match mid {
                Some((i, _)) if i > 0 => {
                    events.push(ModelEvent::ContentDelta(content[..i].to_string()));
                    events.push(ModelEvent::ContentDelta(content[i..].to_string()));
                }
                _ if !content.is_empty() => events.push(ModelEvent::ContentDelta(content)),
                _ => {}
            }
        }
        ModelReply::ToolCalls {
            content,
            tool_calls,
        } => {
            if let Some(content) = content.filter(|c| !c.is_empty()) {
                events.push(ModelEvent::ContentDelta(content));
            }
            for call in tool_calls {
                events.push(ModelEvent::ToolCallStarted {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                });
                if !call.function.arguments.is_empty() {
                    events.push(ModelEvent::ToolCallArgumentDelta {
                        id: call.id,
                        delta: call.function.arguments,
                    });
                }
            }
        }
    }
    events.push(ModelEvent::Done);
    events
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[Tool],
    ) -> Result<ModelReply, ProviderError> {
        match self.next_step(messages) {
            Some(MockStep::Reply(reply)) => Ok(reply),
            Some(MockStep::Fail(err)) => Err(err),
            Some(MockStep::Events(_)) => Err(ProviderError::InvalidRequest(
                "raw events can only be streamed".into(),
            )),
            // Return empty response if no more pre-configured responses
            None => Ok(ModelReply::Text {
                content: String::new(),
            }),
        }
    }

    async fn stream(
        &self,
        messages: &[Message],
        _tools: &[Tool],
    ) -> Result<ModelEventStream, ProviderError> {
        let events: Vec<Result<ModelEvent, ProviderError>> = match self.next_step(messages) {
            Some(MockStep::Reply(reply)) => reply_events(reply).into_iter().map(Ok).collect(),
            Some(MockStep::Fail(err)) => return Err(err),
            Some(MockStep::Events(events)) => events,
            None => vec![Ok(ModelEvent::Done)],
        };
        Ok(Box::pin(stream::iter(events)))
    }
}
