use serde::{Deserialize, Serialize};

use super::content::{nullable_content, ContentBlock, MessageContent};
use super::role::Role;
use super::tool::{ToolCall, ToolCallStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One turn in a conversation
pub struct Message {
    pub role: Role,
    #[serde(default, deserialize_with = "nullable_content")]
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role) -> Self {
        Message {
            role,
            content: MessageContent::default(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new user message
    pub fn user() -> Self {
        Self::new(Role::User)
    }

    /// Create a new assistant message
    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    /// Create a tool-result message for the given tool call
    pub fn tool<I: Into<String>, S: Into<String>>(tool_call_id: I, content: S) -> Self {
        Message {
            tool_call_id: Some(tool_call_id.into()),
            content: MessageContent::Text(content.into()),
            ..Self::new(Role::Tool)
        }
    }

    /// Add text to the message, appending to any existing text
    pub fn with_text<S: Into<String>>(mut self, text: S) -> Self {
        let text = text.into();
        self.content = match self.content {
            MessageContent::Text(existing) => MessageContent::Text(existing + &text),
            MessageContent::Blocks(mut blocks) => {
                blocks.push(ContentBlock::text(text));
                MessageContent::Blocks(blocks)
            }
        };
        self
    }

    /// Add a content block, switching the content to block form
    pub fn with_block(mut self, block: ContentBlock) -> Self {
        let mut blocks = self.content.blocks();
        blocks.push(block);
        self.content = MessageContent::Blocks(blocks);
        self
    }

    /// Attach a tool call request
    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_calls.get_or_insert_with(Vec::new).push(tool_call);
        self
    }

    /// The prose of this message
    pub fn text(&self) -> String {
        self.content.text()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_call_ids().is_empty()
    }

    /// Ids of every tool call requested by this message, in either the
    /// `tool_calls` list or `tool_invocation` blocks
    pub fn tool_call_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .tool_calls
            .iter()
            .flatten()
            .map(|call| call.id.as_str())
            .collect();
        if let MessageContent::Blocks(blocks) = &self.content {
            for block in blocks {
                if let ContentBlock::ToolInvocation { id, .. } = block {
                    if !ids.contains(&id.as_str()) {
                        ids.push(id);
                    }
                }
            }
        }
        ids
    }

    /// Ids of every tool call this message answers, either as a `tool` turn
    /// or through `tool_result` blocks
    pub fn tool_result_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tool_call_id.iter().map(String::as_str).collect();
        if let MessageContent::Blocks(blocks) = &self.content {
            for block in blocks {
                if let ContentBlock::ToolResult { tool_call_id, .. } = block {
                    ids.push(tool_call_id);
                }
            }
        }
        ids
    }

    pub fn tool_call_mut(&mut self, id: &str) -> Option<&mut ToolCall> {
        self.tool_calls
            .as_mut()?
            .iter_mut()
            .find(|call| call.id == id)
    }

    /// Tool calls of this message that have not reached a finished status
    pub fn unfinished_tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.tool_calls
            .iter()
            .flatten()
            .filter(|call| !call.status.is_finished())
    }

    pub fn tool_call_status(&self, id: &str) -> Option<ToolCallStatus> {
        self.tool_calls
            .iter()
            .flatten()
            .find(|call| call.id == id)
            .map(|call| call.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_history_round_trip() {
        let history = vec![
            Message::user().with_text("How many rows?"),
            Message::assistant()
                .with_text("Let me query that.")
                .with_tool_call(ToolCall::new("call_1", "bigquery", r#"{"query":"SELECT 1"}"#)),
            Message::tool("call_1", r#"{"rows":[{"f0_":1}]}"#),
            Message::assistant().with_text("There is 1 row."),
            Message::user()
                .with_text("And now?")
                .with_block(ContentBlock::ToolResult {
                    tool_call_id: "call_9".into(),
                    content: "late".into(),
                    is_error: true,
                }),
        ];

        let wire = serde_json::to_string(&history).unwrap();
        let parsed: Vec<Message> = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed, history);
    }

    #[test]
    fn test_openai_style_null_content() {
        let message: Message = serde_json::from_value(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{"id": "a", "function": {"name": "f", "arguments": "{}"}}]
        }))
        .unwrap();
        assert_eq!(message.content, MessageContent::Text(String::new()));
        assert_eq!(message.tool_call_ids(), vec!["a"]);
    }

    #[test]
    fn test_tool_message_shape() {
        let message = Message::tool("call_1", "42");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"role": "tool", "content": "42", "tool_call_id": "call_1"})
        );
        assert_eq!(message.tool_result_ids(), vec!["call_1"]);
    }

    #[test]
    fn test_tool_call_ids_from_blocks() {
        let message = Message::assistant()
            .with_text("checking")
            .with_block(ContentBlock::ToolInvocation {
                id: "toolu_1".into(),
                name: "bigquery".into(),
                input: json!({}),
            });
        assert_eq!(message.tool_call_ids(), vec!["toolu_1"]);
        assert_eq!(message.text(), "checking");
    }
}
