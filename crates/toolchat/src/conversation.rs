use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::TurnError;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{ToolCall, ToolCallStatus};
use crate::providers::base::{ModelEvent, ModelReply};

/// Where a turn is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    AwaitingModel,
    ToolRequested,
    ToolExecuting,
    ToolResultReady,
    /// Terminal: the model answered with text
    ModelRespondedText,
    /// Terminal: the turn was aborted
    Errored,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::ModelRespondedText | TurnState::Errored)
    }
}

/// Everything the caller observes during a turn, in the order it happens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Streamed model text, only produced in streaming mode
    ContentDelta { content: String },
    /// The model asked for tools; every call is still pending
    AssistantMessage { message: Message },
    /// A tool call moved to executing
    ToolCallStart { tool_call_id: String, name: String },
    /// A tool call finished and its result turn was appended
    ToolCallResult {
        tool_call_id: String,
        status: ToolCallStatus,
        message: Message,
    },
    /// The terminal assistant reply
    FinalResponse { message: Message },
    /// The turn was aborted; always the last event
    Error {
        message: String,
        pending_tool_calls: Vec<String>,
    },
}

/// The collected result of one turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub messages: Vec<Message>,
    pub state: TurnState,
    pub error: Option<String>,
    /// Ids of tool calls that never finished because the turn was aborted
    pub incomplete_tool_calls: Vec<String>,
}

/// A history being extended by one turn.
///
/// The history is only ever appended to; the status of a tool call is the
/// one field updated in place, and only along its state machine.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
    turn_start: usize,
    state: TurnState,
    partial: String,
    error: Option<String>,
}

impl Conversation {
    pub fn new(history: Vec<Message>) -> Self {
        Conversation {
            turn_start: history.len(),
            messages: history,
            state: TurnState::AwaitingModel,
            partial: String::new(),
            error: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Start a turn with the user's message
    pub fn push_user(&mut self, message: Message) {
        self.turn_start = self.messages.len();
        self.messages.push(message);
        self.state = TurnState::AwaitingModel;
    }

    /// Mark that the model is being called again after tool results
    pub fn await_model(&mut self) {
        if !self.state.is_terminal() {
            self.state = TurnState::AwaitingModel;
        }
    }

    /// Fold an event into the history, returning it for delivery.
    pub fn apply(&mut self, event: TurnEvent) -> Result<TurnEvent, TurnError> {
        if self.state.is_terminal() {
            return Err(TurnError::Protocol(format!(
                "turn already ended in {:?}",
                self.state
            )));
        }

        match &event {
            TurnEvent::ContentDelta { content } => self.partial.push_str(content),
            TurnEvent::AssistantMessage { message } => {
                self.check_new_calls(message)?;
                self.partial.clear();
                self.messages.push(message.clone());
                self.state = TurnState::ToolRequested;
            }
            TurnEvent::ToolCallStart { tool_call_id, .. } => {
                self.advance(tool_call_id, ToolCallStatus::Executing)?;
                self.state = TurnState::ToolExecuting;
            }
            TurnEvent::ToolCallResult {
                tool_call_id,
                status,
                message,
            } => {
                self.advance(tool_call_id, *status)?;
                self.messages.push(message.clone());
                self.state = TurnState::ToolResultReady;
            }
            TurnEvent::FinalResponse { message } => {
                self.partial.clear();
                self.messages.push(message.clone());
                self.state = TurnState::ModelRespondedText;
            }
            TurnEvent::Error { message, .. } => {
                if !self.partial.is_empty() {
                    let text = std::mem::take(&mut self.partial);
                    self.messages.push(Message::assistant().with_text(text));
                }
                self.error = Some(message.clone());
                self.state = TurnState::Errored;
            }
        }

        Ok(event)
    }

    /// End the turn with an error, returning the event to deliver
    pub fn fail(&mut self, err: TurnError) -> TurnEvent {
        tracing::error!("turn failed: {}", err);
        let event = TurnEvent::Error {
            message: err.to_string(),
            pending_tool_calls: self.incomplete_tool_calls(),
        };
        match self.apply(event) {
            Ok(event) => event,
            // already terminal, report without changing the history
            Err(_) => TurnEvent::Error {
                message: err.to_string(),
                pending_tool_calls: Vec::new(),
            },
        }
    }

    /// Tool calls of this turn that never reached a finished status
    pub fn incomplete_tool_calls(&self) -> Vec<String> {
        self.messages[self.turn_start.min(self.messages.len())..]
            .iter()
            .flat_map(Message::unfinished_tool_calls)
            .map(|call| call.id.clone())
            .collect()
    }

    pub fn into_outcome(self) -> TurnOutcome {
        TurnOutcome {
            incomplete_tool_calls: self.incomplete_tool_calls(),
            messages: self.messages,
            state: self.state,
            error: self.error,
        }
    }

    fn check_new_calls(&self, message: &Message) -> Result<(), TurnError> {
        let mut seen: HashSet<&str> = self
            .messages
            .iter()
            .flat_map(Message::tool_call_ids)
            .collect();
        for id in message.tool_call_ids() {
            if !seen.insert(id) {
                return Err(TurnError::Protocol(format!(
                    "model reused tool call id {}",
                    id
                )));
            }
        }
        Ok(())
    }

    fn advance(&mut self, id: &str, next: ToolCallStatus) -> Result<(), TurnError> {
        let call = self
            .messages
            .iter_mut()
            .rev()
            .find_map(|message| message.tool_call_mut(id))
            .ok_or_else(|| TurnError::Protocol(format!("unknown tool call {}", id)))?;

        if !call.status.can_transition_to(next) {
            return Err(TurnError::Protocol(format!(
                "tool call {} cannot move from {:?} to {:?}",
                id, call.status, next
            )));
        }
        call.status = next;
        Ok(())
    }
}

/// Check that every tool result in a history answers exactly one earlier
/// tool call.
pub fn validate_history(messages: &[Message]) -> Result<(), TurnError> {
    let mut requested: HashSet<&str> = HashSet::new();
    let mut answered: HashSet<&str> = HashSet::new();

    for (index, message) in messages.iter().enumerate() {
        if message.role == Role::Tool && message.tool_call_id.is_none() {
            return Err(TurnError::InvalidHistory(format!(
                "message {} is a tool turn without tool_call_id",
                index
            )));
        }
        for id in message.tool_result_ids() {
            if !requested.contains(id) {
                return Err(TurnError::InvalidHistory(format!(
                    "message {} answers unknown tool call {}",
                    index, id
                )));
            }
            if !answered.insert(id) {
                return Err(TurnError::InvalidHistory(format!(
                    "message {} answers tool call {} a second time",
                    index, id
                )));
            }
        }
        if message.role == Role::Assistant {
            for id in message.tool_call_ids() {
                if !requested.insert(id) {
                    return Err(TurnError::InvalidHistory(format!(
                        "message {} repeats tool call id {}",
                        index, id
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Assembles streamed model events into a [`ModelReply`]
#[derive(Debug, Default)]
pub struct ReplyAccumulator {
    content: String,
    tool_calls: Vec<ToolCall>,
    done: bool,
}

impl ReplyAccumulator {
    pub fn push(&mut self, event: &ModelEvent) -> Result<(), TurnError> {
        if self.done {
            return Err(TurnError::Protocol(
                "model stream continued after done".to_string(),
            ));
        }

        match event {
            ModelEvent::ContentDelta(text) => self.content.push_str(text),
            ModelEvent::ToolCallStarted { id, name } => {
                if self.tool_calls.iter().any(|call| &call.id == id) {
                    return Err(TurnError::Protocol(format!(
                        "tool call {} started twice",
                        id
                    )));
                }
                self.tool_calls.push(ToolCall::new(id, name, ""));
            }
            ModelEvent::ToolCallArgumentDelta { id, delta } => {
                let call = self
                    .tool_calls
                    .iter_mut()
                    .find(|call| &call.id == id)
                    .ok_or_else(|| {
                        TurnError::Protocol(format!(
                            "arguments for tool call {} arrived before it started",
                            id
                        ))
                    })?;
                call.function.arguments.push_str(delta);
            }
            ModelEvent::Done => self.done = true,
        }
        Ok(())
    }

    pub fn finish(self) -> Result<ModelReply, TurnError> {
        if !self.done {
            return Err(TurnError::Protocol(
                "model stream ended before done".to_string(),
            ));
        }
        if self.tool_calls.is_empty() {
            Ok(ModelReply::Text {
                content: self.content,
            })
        } else {
            Ok(ModelReply::ToolCalls {
                content: Some(self.content).filter(|c| !c.is_empty()),
                tool_calls: self.tool_calls,
            })
        }
    }
}
