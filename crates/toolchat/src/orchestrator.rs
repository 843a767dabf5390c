use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::conversation::{validate_history, Conversation, ReplyAccumulator, TurnEvent, TurnOutcome};
use crate::errors::{ToolError, ToolResult, TurnError};
use crate::executor::ToolExecutor;
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall, ToolCallStatus};
use crate::providers::base::{ModelEvent, ModelReply, Provider};
use crate::registry::ToolRegistry;

pub const DEFAULT_MAX_ROUNDS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Model calls allowed in one turn before it is aborted
    pub max_rounds: usize,
    /// Use the provider's streaming endpoint and forward text deltas
    pub stream: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            stream: false,
        }
    }
}

/// Orchestrator drives a model through tool calls until it answers with text
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    registry: Arc<dyn ToolRegistry>,
    executor: ToolExecutor,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<dyn ToolRegistry>,
        executor: ToolExecutor,
    ) -> Self {
        Self {
            provider,
            registry,
            executor,
            config: OrchestratorConfig::default(),
        }
    }

    /// A `max_rounds` of zero is raised to one so a turn can reach the model
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = OrchestratorConfig {
            max_rounds: config.max_rounds.max(1),
            ..config
        };
        self
    }

    pub fn config(&self) -> OrchestratorConfig {
        self.config
    }

    /// Run one user turn on top of `history`, streaming what happens.
    ///
    /// The stream ends after a `FinalResponse` or a single `Error` event.
    /// Dropping it stops the turn at the next await; a tool already handed to
    /// the executor still finishes and is logged.
    pub fn reply(&self, history: &[Message], user: Message) -> BoxStream<'_, TurnEvent> {
        let history = history.to_vec();

        Box::pin(async_stream::stream! {
            let turn_id = Uuid::new_v4();
            let mut conversation = Conversation::new(history);

            if let Err(err) = validate_history(conversation.messages()) {
                yield conversation.fail(err);
                return;
            }
            conversation.push_user(user);
            tracing::info!("turn {} started with {} prior messages", turn_id, conversation.messages().len() - 1);

            // The catalog is read once per turn
            let tools = match self.registry.list_tools().await {
                Ok(tools) => tools,
                Err(err) => {
                    yield conversation.fail(TurnError::Registry(err.to_string()));
                    return;
                }
            };

            let mut rounds = 0;
            loop {
                if rounds >= self.config.max_rounds {
                    yield conversation.fail(TurnError::Protocol(format!(
                        "model requested tools for more than {} rounds",
                        self.config.max_rounds
                    )));
                    return;
                }
                rounds += 1;
                conversation.await_model();
                tracing::debug!("turn {} round {} calling {}", turn_id, rounds, self.provider.name());

                let reply = if self.config.stream {
                    let mut accumulator = ReplyAccumulator::default();
                    let mut failure = None;
                    match self.provider.stream(conversation.messages(), &tools).await {
                        Ok(mut events) => {
                            while let Some(event) = events.next().await {
                                let event = match event {
                                    Ok(event) => event,
                                    Err(err) => {
                                        failure = Some(TurnError::from(err));
                                        break;
                                    }
                                };
                                if let Err(err) = accumulator.push(&event) {
                                    failure = Some(err);
                                    break;
                                }
                                if let ModelEvent::ContentDelta(content) = event {
                                    match conversation.apply(TurnEvent::ContentDelta { content }) {
                                        Ok(delta) => yield delta,
                                        Err(err) => {
                                            failure = Some(err);
                                            break;
                                        }
                                    }
                                }
                            }
                        }
                        Err(err) => failure = Some(TurnError::from(err)),
                    }
                    match failure {
                        Some(err) => Err(err),
                        None => accumulator.finish(),
                    }
                } else {
                    self.provider
                        .complete(conversation.messages(), &tools)
                        .await
                        .map_err(TurnError::from)
                };

                let reply = match reply {
                    Ok(reply) => reply,
                    Err(err) => {
                        yield conversation.fail(err);
                        return;
                    }
                };

                let calls = match &reply {
                    ModelReply::Text { .. } => None,
                    ModelReply::ToolCalls { tool_calls, .. } => Some(tool_calls.clone()),
                };
                let message = reply.into_message();

                let Some(calls) = calls else {
                    match conversation.apply(TurnEvent::FinalResponse { message }) {
                        Ok(event) => yield event,
                        Err(err) => yield conversation.fail(err),
                    }
                    tracing::info!("turn {} completed after {} rounds", turn_id, rounds);
                    return;
                };

                match conversation.apply(TurnEvent::AssistantMessage { message }) {
                    Ok(event) => yield event,
                    Err(err) => {
                        yield conversation.fail(err);
                        return;
                    }
                }

                // One call at a time, in the order the model issued them
                for call in calls {
                    let start = TurnEvent::ToolCallStart {
                        tool_call_id: call.id.clone(),
                        name: call.function.name.clone(),
                    };
                    match conversation.apply(start) {
                        Ok(event) => yield event,
                        Err(err) => {
                            yield conversation.fail(err);
                            return;
                        }
                    }

                    let outcome = self.run_tool_call(&call, &tools).await;
                    let (status, content) = match outcome {
                        Ok(value) => (ToolCallStatus::Completed, result_text(value)),
                        Err(err) => (ToolCallStatus::Failed, format!("Error: {}", err)),
                    };
                    let result = TurnEvent::ToolCallResult {
                        tool_call_id: call.id.clone(),
                        status,
                        message: Message::tool(call.id.clone(), content),
                    };
                    match conversation.apply(result) {
                        Ok(event) => yield event,
                        Err(err) => {
                            yield conversation.fail(err);
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Run a turn to completion and collect the resulting history
    pub async fn run_turn(&self, history: &[Message], user: Message) -> TurnOutcome {
        let mut conversation = Conversation::new(history.to_vec());
        if validate_history(history).is_ok() {
            conversation.push_user(user.clone());
        }

        let mut events = self.reply(history, user);
        while let Some(event) = events.next().await {
            if let Err(err) = conversation.apply(event) {
                tracing::warn!("dropping event that does not fit the turn: {}", err);
            }
        }

        conversation.into_outcome()
    }

    async fn run_tool_call(&self, call: &ToolCall, tools: &[Tool]) -> ToolResult<Value> {
        let tool = tools
            .iter()
            .find(|tool| tool.name == call.function.name)
            .ok_or_else(|| ToolError::NotFound(call.function.name.clone()))?;
        let args = call.parse_arguments()?;

        self.executor
            .spawn(tool.clone(), args)
            .await
            .map_err(|e| ToolError::backend(format!("Tool task failed: {}", e)))?
    }
}

/// The text of a tool result as fed back to the model
fn result_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}
