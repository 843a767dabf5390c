use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};

/// What the model answered for one request
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// A terminal text reply
    Text { content: String },
    /// The model wants tools executed, possibly with accompanying prose
    ToolCalls {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
}

impl ModelReply {
    /// Convert the reply into the assistant message appended to the history
    pub fn into_message(self) -> Message {
        match self {
            ModelReply::Text { content } => Message::assistant().with_text(content),
            ModelReply::ToolCalls {
                content,
                tool_calls,
            } => tool_calls.into_iter().fold(
                Message::assistant().with_text(content.unwrap_or_default()),
                |message, call| message.with_tool_call(call),
            ),
        }
    }
}

/// Incremental output of a streamed model reply
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    ContentDelta(String),
    ToolCallStarted { id: String, name: String },
    ToolCallArgumentDelta { id: String, delta: String },
    Done,
}

/// A lazy, finite sequence of model events. Dropping it closes the
/// underlying response body.
pub type ModelEventStream = BoxStream<'static, Result<ModelEvent, ProviderError>>;

/// Base trait for LLM providers (Anthropic, OpenAI)
///
/// Implementations translate the internal history and tool catalog into the
/// provider's request shape and the provider's reply back into a
/// [`ModelReply`]. They never retry: whether a retry is safe is the
/// orchestrator's call.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    /// Generate the next reply for the history
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ModelReply, ProviderError>;

    /// Generate the next reply as a stream of incremental events
    async fn stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ModelEventStream, ProviderError>;
}
