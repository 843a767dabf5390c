use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use super::base::{ModelEvent, ModelEventStream, ModelReply, Provider};
use super::configs::AnthropicProviderConfig;
use super::utils::{check_response_status, object_schema, sse_data_stream};
use crate::errors::ProviderError;
use crate::models::content::ContentBlock;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall, ToolCallStatus};

pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: i32 = 1024;

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn build_payload(&self, messages: &[Message], tools: &[Tool], stream: bool) -> Value {
        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.config.model));
        payload.insert(
            "max_tokens".to_string(),
            json!(self.config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        payload.insert(
            "messages".to_string(),
            json!(messages_to_anthropic_spec(messages)),
        );

        if let Some(system) = self.config.system.as_deref().filter(|s| !s.is_empty()) {
            payload.insert("system".to_string(), json!(system));
        }
        if !tools.is_empty() {
            payload.insert("tools".to_string(), json!(tools_to_anthropic_spec(tools)));
        }
        if let Some(temp) = self.config.temperature {
            payload.insert("temperature".to_string(), json!(temp));
        }
        if stream {
            payload.insert("stream".to_string(), json!(true));
        }

        Value::Object(payload)
    }

    async fn post(&self, payload: Value) -> Result<Response, ProviderError> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(&payload)
            .send()
            .await?;

        check_response_status(response).await
    }
}

/// Convert internal messages to Anthropic's alternating user/assistant turns.
///
/// `tool` turns become `tool_result` blocks inside a user turn, and adjacent
/// turns with the same role are merged because the API rejects repeats.
pub fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
    let mut statuses: HashMap<&str, ToolCallStatus> = HashMap::new();
    let mut spec: Vec<Value> = Vec::new();

    for message in messages {
        let mut blocks = Vec::new();
        let role = match message.role {
            Role::User => {
                for block in message.content.blocks() {
                    match block {
                        ContentBlock::Text { text } if !text.is_empty() => {
                            blocks.push(json!({"type": "text", "text": text}));
                        }
                        ContentBlock::ToolResult {
                            tool_call_id,
                            content,
                            is_error,
                        } => blocks.push(tool_result_block(&tool_call_id, &content, is_error)),
                        _ => {}
                    }
                }
                "user"
            }
            Role::Assistant => {
                let text = message.text();
                if !text.is_empty() {
                    blocks.push(json!({"type": "text", "text": text}));
                }
                for call in message.tool_calls.iter().flatten() {
                    statuses.insert(&call.id, call.status);
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.function.name,
                        "input": call.parse_arguments().unwrap_or_else(|_| json!({})),
                    }));
                }
                for block in message.content.blocks() {
                    if let ContentBlock::ToolInvocation { id, name, input } = block {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": id,
                            "name": name,
                            "input": input,
                        }));
                    }
                }
                "assistant"
            }
            Role::Tool => {
                let id = message.tool_call_id.as_deref().unwrap_or_default();
                let failed = statuses.get(id) == Some(&ToolCallStatus::Failed);
                blocks.push(tool_result_block(id, &message.text(), failed));
                "user"
            }
        };

        if blocks.is_empty() {
            continue;
        }
        if let Some(last) = spec.last_mut() {
            if last["role"] == role {
                if let Some(content) = last["content"].as_array_mut() {
                    content.extend(blocks);
                    continue;
                }
            }
        }
        spec.push(json!({"role": role, "content": blocks}));
    }

    spec
}

fn tool_result_block(tool_use_id: &str, content: &str, is_error: bool) -> Value {
    let mut block = json!({
        "type": "tool_result",
        "tool_use_id": tool_use_id,
        "content": content,
    });
    if is_error {
        block["is_error"] = json!(true);
    }
    block
}

pub fn tools_to_anthropic_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": object_schema(&tool.input_schema),
            })
        })
        .collect()
}

/// Convert an Anthropic response to a model reply. A tool request is signalled
/// by `stop_reason: "tool_use"` together with `tool_use` content blocks.
pub fn anthropic_response_to_reply(response: &Value) -> Result<ModelReply, ProviderError> {
    if response["type"] == "error" {
        return Err(ProviderError::MalformedResponse(format!(
            "Anthropic API error: {}",
            response["error"]
        )));
    }

    let blocks = response["content"]
        .as_array()
        .ok_or_else(|| ProviderError::MalformedResponse("missing content array".into()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block["type"].as_str() {
            Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
            Some("tool_use") => {
                let id = block["id"].as_str().ok_or_else(|| {
                    ProviderError::MalformedResponse("tool_use block without id".into())
                })?;
                let name = block["name"].as_str().ok_or_else(|| {
                    ProviderError::MalformedResponse(format!("tool_use block {} without name", id))
                })?;
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(ToolCall::new(id, name, input.to_string()));
            }
            _ => {}
        }
    }

    let stop_reason = response["stop_reason"].as_str();
    if stop_reason == Some("tool_use") {
        if tool_calls.is_empty() {
            return Err(ProviderError::MalformedResponse(
                "stop_reason is tool_use but no tool_use block was returned".into(),
            ));
        }
        return Ok(ModelReply::ToolCalls {
            content: Some(text).filter(|t| !t.is_empty()),
            tool_calls,
        });
    }

    if !tool_calls.is_empty() {
        tracing::warn!(
            ?stop_reason,
            count = tool_calls.len(),
            "ignoring tool_use blocks on a reply that did not stop for tool use"
        );
    }
    Ok(ModelReply::Text { content: text })
}

/// Tracks which tool call each streamed content block index belongs to
#[derive(Debug, Default)]
struct AnthropicStreamState {
    ids: HashMap<u64, String>,
}

impl AnthropicStreamState {
    fn events_for_data(&mut self, data: &str) -> Result<Vec<ModelEvent>, ProviderError> {
        let event: Value = serde_json::from_str(data).map_err(|e| {
            ProviderError::MalformedResponse(format!("Invalid stream event: {}", e))
        })?;
        let index = event["index"].as_u64().unwrap_or(0);

        let events = match event["type"].as_str() {
            Some("content_block_start") => {
                let block = &event["content_block"];
                match block["type"].as_str() {
                    Some("tool_use") => {
                        let id = block["id"].as_str().ok_or_else(|| {
                            ProviderError::MalformedResponse("tool_use block without id".into())
                        })?;
                        self.ids.insert(index, id.to_string());
                        vec![ModelEvent::ToolCallStarted {
                            id: id.to_string(),
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                        }]
                    }
                    Some("text") => match block["text"].as_str() {
                        Some(text) if !text.is_empty() => {
                            vec![ModelEvent::ContentDelta(text.to_string())]
                        }
                        _ => vec![],
                    },
                    _ => vec![],
                }
            }
            Some("content_block_delta") => {
                let delta = &event["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => vec![ModelEvent::ContentDelta(
                        delta["text"].as_str().unwrap_or_default().to_string(),
                    )],
                    Some("input_json_delta") => {
                        let partial = delta["partial_json"].as_str().unwrap_or_default();
                        if partial.is_empty() {
                            vec![]
                        } else {
                            let id = self.ids.get(&index).ok_or_else(|| {
                                ProviderError::MalformedResponse(format!(
                                    "input_json_delta for unknown content block {}",
                                    index
                                ))
                            })?;
                            vec![ModelEvent::ToolCallArgumentDelta {
                                id: id.clone(),
                                delta: partial.to_string(),
                            }]
                        }
                    }
                    _ => vec![],
                }
            }
            Some("message_stop") => vec![ModelEvent::Done],
            Some("error") => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                return Err(match event["error"]["type"].as_str() {
                    Some("rate_limit_error") | Some("overloaded_error") => {
                        ProviderError::RateLimited(message)
                    }
                    _ => ProviderError::MalformedResponse(message),
                });
            }
            // message_start, message_delta, content_block_stop, ping
            _ => vec![],
        };

        Ok(events)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ModelReply, ProviderError> {
        let payload = self.build_payload(messages, tools, false);
        let response: Value = self.post(payload).await?.json().await?;
        anthropic_response_to_reply(&response)
    }

    async fn stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ModelEventStream, ProviderError> {
        let payload = self.build_payload(messages, tools, true);
        let mut lines = sse_data_stream(self.post(payload).await?);

        Ok(Box::pin(async_stream::stream! {
            let mut state = AnthropicStreamState::default();
            while let Some(line) = lines.next().await {
                match line.and_then(|data| state.events_for_data(&data)) {
                    Ok(events) => {
                        for event in events {
                            yield Ok(event);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }))
    }
}
