use futures::stream::{BoxStream, StreamExt};
use reqwest::{Response, StatusCode};
use serde_json::{json, Value};

use crate::errors::ProviderError;
use crate::models::content::ContentBlock;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};
use crate::providers::base::ModelReply;

/// Map a non-success HTTP status onto a provider error, consuming the body
pub async fn check_response_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::TOO_MANY_REQUESTS {
        Err(ProviderError::RateLimited(body))
    } else {
        Err(ProviderError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

/// Split a Server-Sent-Events body into the payloads of its `data:` lines.
///
/// Lines are reassembled across chunk boundaries before decoding so multi-byte
/// characters are never split.
pub fn sse_data_stream(response: Response) -> BoxStream<'static, Result<String, ProviderError>> {
    Box::pin(async_stream::stream! {
        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(ProviderError::from(e));
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if let Some(data) = sse_data_line(&line) {
                    yield Ok(data);
                }
            }
        }

        if let Some(data) = sse_data_line(&buffer) {
            yield Ok(data);
        }
    })
}

fn sse_data_line(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
    line.strip_prefix("data:")
        .map(|data| data.strip_prefix(' ').unwrap_or(data).to_string())
}

/// Providers reject tool schemas whose top level is not an object
pub fn object_schema(schema: &Value) -> Value {
    let mut schema = match schema {
        Value::Object(_) => schema.clone(),
        _ => json!({}),
    };
    schema["type"] = json!("object");
    if schema.get("properties").is_none() {
        schema["properties"] = json!({});
    }
    schema
}

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message], system: Option<&str>) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    if let Some(system) = system.filter(|s| !s.is_empty()) {
        messages_spec.push(json!({"role": "system", "content": system}));
    }

    for message in messages {
        let text = message.text();
        match message.role {
            Role::User => {
                // Anthropic-style tool results in a user turn become tool messages
                for block in message.content.blocks() {
                    if let ContentBlock::ToolResult {
                        tool_call_id,
                        content,
                        ..
                    } = block
                    {
                        messages_spec.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_call_id,
                            "content": content,
                        }));
                    }
                }
                if !text.is_empty() {
                    messages_spec.push(json!({"role": "user", "content": text}));
                }
            }
            Role::Assistant => {
                let mut tool_calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .flatten()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.function.name,
                                "arguments": call.function.arguments,
                            }
                        })
                    })
                    .collect();
                for block in message.content.blocks() {
                    if let ContentBlock::ToolInvocation { id, name, input } = block {
                        tool_calls.push(json!({
                            "id": id,
                            "type": "function",
                            "function": {"name": name, "arguments": input.to_string()}
                        }));
                    }
                }

                if text.is_empty() && tool_calls.is_empty() {
                    continue;
                }
                let content = if text.is_empty() {
                    Value::Null
                } else {
                    json!(text)
                };
                let mut converted = json!({"role": "assistant", "content": content});
                if !tool_calls.is_empty() {
                    converted["tool_calls"] = json!(tool_calls);
                }
                messages_spec.push(converted);
            }
            Role::Tool => {
                messages_spec.push(json!({
                    "role": "tool",
                    "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": text,
                }));
            }
        }
    }

    messages_spec
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>, ProviderError> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(ProviderError::InvalidRequest(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": object_schema(&tool.input_schema),
            }
        }));
    }

    Ok(result)
}

/// Convert OpenAI's API response to a model reply
pub fn openai_response_to_reply(response: &Value) -> Result<ModelReply, ProviderError> {
    if let Some(error) = response.get("error") {
        return Err(ProviderError::MalformedResponse(format!(
            "OpenAI API error: {}",
            error
        )));
    }

    let message = response
        .pointer("/choices/0/message")
        .ok_or_else(|| ProviderError::MalformedResponse("missing choices[0].message".into()))?;
    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(String::from);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
        for call in calls {
            let id = call["id"]
                .as_str()
                .ok_or_else(|| ProviderError::MalformedResponse("tool call without id".into()))?;
            let name = call["function"]["name"].as_str().ok_or_else(|| {
                ProviderError::MalformedResponse(format!("tool call {} without a name", id))
            })?;
            let arguments = call["function"]["arguments"].as_str().unwrap_or_default();
            tool_calls.push(ToolCall::new(id, name, arguments));
        }
    }

    if tool_calls.is_empty() {
        Ok(ModelReply::Text {
            content: content.unwrap_or_default(),
        })
    } else {
        Ok(ModelReply::ToolCalls {
            content: content.filter(|c| !c.is_empty()),
            tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::tool::ToolType;

    const OPENAI_TOOL_USE_RESPONSE: &str = r#"{
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "1",
                    "type": "function",
                    "function": {
                        "name": "example_fn",
                        "arguments": "{\"param\": \"value\"}"
                    }
                }]
            },
            "finish_reason": "tool_calls"
        }]
    }"#;

    fn tool(name: &str) -> Tool {
        Tool {
            id: 1,
            name: name.to_string(),
            description: "A test tool".to_string(),
            tool_type: ToolType::Function,
            input_schema: json!({
                "type": "object",
                "properties": {"input": {"type": "string"}},
                "required": ["input"]
            }),
            config: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_messages_to_openai_spec() {
        let spec = messages_to_openai_spec(&[Message::user().with_text("Hello")], Some("Be brief"));

        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0]["role"], "system");
        assert_eq!(spec[1]["role"], "user");
        assert_eq!(spec[1]["content"], "Hello");
    }

    #[test]
    fn test_messages_to_openai_spec_tool_round() {
        let messages = vec![
            Message::user().with_text("How are you?"),
            Message::assistant()
                .with_tool_call(ToolCall::new("tool1", "example", r#"{"param1":"value1"}"#)),
            Message::tool("tool1", "Result"),
            Message::assistant().with_text("Fine."),
        ];

        let spec = messages_to_openai_spec(&messages, None);

        assert_eq!(spec.len(), 4);
        assert_eq!(spec[1]["role"], "assistant");
        assert_eq!(spec[1]["content"], Value::Null);
        assert_eq!(spec[1]["tool_calls"][0]["function"]["arguments"], r#"{"param1":"value1"}"#);
        assert_eq!(spec[2]["role"], "tool");
        assert_eq!(spec[2]["content"], "Result");
        assert_eq!(spec[2]["tool_call_id"], spec[1]["tool_calls"][0]["id"]);
    }

    #[test]
    fn test_messages_to_openai_spec_from_blocks() {
        let messages = vec![
            Message::assistant().with_block(ContentBlock::ToolInvocation {
                id: "toolu_1".into(),
                name: "lookup".into(),
                input: json!({"q": "x"}),
            }),
            Message::user().with_block(ContentBlock::ToolResult {
                tool_call_id: "toolu_1".into(),
                content: "found".into(),
                is_error: false,
            }),
        ];

        let spec = messages_to_openai_spec(&messages, None);

        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0]["tool_calls"][0]["function"]["arguments"], r#"{"q":"x"}"#);
        assert_eq!(spec[1]["role"], "tool");
        assert_eq!(spec[1]["tool_call_id"], "toolu_1");
    }

    #[test]
    fn test_tools_to_openai_spec() {
        let spec = tools_to_openai_spec(&[tool("test_tool")]).unwrap();

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "test_tool");
        assert_eq!(spec[0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_tools_to_openai_spec_duplicate() {
        let result = tools_to_openai_spec(&[tool("test_tool"), tool("test_tool")]);
        assert!(matches!(
            result,
            Err(ProviderError::InvalidRequest(msg)) if msg.contains("Duplicate tool name")
        ));
    }

    #[test]
    fn test_object_schema_forces_object() {
        assert_eq!(object_schema(&json!(null)), json!({"type": "object", "properties": {}}));
        assert_eq!(
            object_schema(&json!({"properties": {"a": {"type": "string"}}}))["type"],
            "object"
        );
    }

    #[test]
    fn test_openai_response_to_reply_text() {
        let response = json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello!"}}]
        });

        let reply = openai_response_to_reply(&response).unwrap();
        assert_eq!(
            reply,
            ModelReply::Text {
                content: "Hello!".to_string()
            }
        );
    }

    #[test]
    fn test_openai_response_to_reply_tool_calls() {
        let response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE).unwrap();
        match openai_response_to_reply(&response).unwrap() {
            ModelReply::ToolCalls {
                content,
                tool_calls,
            } => {
                assert!(content.is_none());
                assert_eq!(tool_calls.len(), 1);
                assert_eq!(tool_calls[0].name(), "example_fn");
                // arguments stay raw until execution
                assert_eq!(tool_calls[0].function.arguments, r#"{"param": "value"}"#);
            }
            other => panic!("Expected tool calls, got {:?}", other),
        }
    }

    #[test]
    fn test_openai_response_missing_choices() {
        let result = openai_response_to_reply(&json!({"id": "x"}));
        assert!(matches!(result, Err(ProviderError::MalformedResponse(_))));
    }

    #[test]
    fn test_sse_data_line() {
        assert_eq!(sse_data_line(b"data: {\"a\":1}\r\n"), Some("{\"a\":1}".to_string()));
        assert_eq!(sse_data_line(b"data:[DONE]\n"), Some("[DONE]".to_string()));
        assert_eq!(sse_data_line(b"event: ping\n"), None);
    }
}
