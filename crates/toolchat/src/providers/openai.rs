use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use super::base::{ModelEvent, ModelEventStream, ModelReply, Provider};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    check_response_status, messages_to_openai_spec, openai_response_to_reply, sse_data_stream,
    tools_to_openai_spec,
};
use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::tool::Tool;

pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const OPENAI_MODEL: &str = "gpt-4o";

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn build_payload(
        &self,
        messages: &[Message],
        tools: &[Tool],
        stream: bool,
    ) -> Result<Value, ProviderError> {
        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.config.model));
        payload.insert(
            "messages".to_string(),
            json!(messages_to_openai_spec(
                messages,
                self.config.system.as_deref()
            )),
        );

        let tools_spec = tools_to_openai_spec(tools)?;
        if !tools_spec.is_empty() {
            payload.insert("tools".to_string(), json!(tools_spec));
            payload.insert("tool_choice".to_string(), json!("auto"));
        }
        if let Some(temp) = self.config.temperature {
            payload.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = self.config.max_tokens {
            payload.insert("max_tokens".to_string(), json!(tokens));
        }
        if stream {
            payload.insert("stream".to_string(), json!(true));
        }

        Ok(Value::Object(payload))
    }

    async fn post(&self, payload: Value) -> Result<Response, ProviderError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        check_response_status(response).await
    }
}

/// Tracks which tool call each streamed `index` belongs to
#[derive(Debug, Default)]
struct OpenAiStreamState {
    ids: HashMap<u64, String>,
}

impl OpenAiStreamState {
    fn events_for_data(&mut self, data: &str) -> Result<Vec<ModelEvent>, ProviderError> {
        if data.trim() == "[DONE]" {
            return Ok(vec![ModelEvent::Done]);
        }

        let chunk: Value = serde_json::from_str(data).map_err(|e| {
            ProviderError::MalformedResponse(format!("Invalid stream chunk: {}", e))
        })?;
        if let Some(error) = chunk.get("error") {
            return Err(ProviderError::MalformedResponse(format!(
                "OpenAI stream error: {}",
                error
            )));
        }

        let mut events = Vec::new();
        // Usage-only chunks carry no choices
        let Some(delta) = chunk.pointer("/choices/0/delta") else {
            return Ok(events);
        };

        if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
            if !text.is_empty() {
                events.push(ModelEvent::ContentDelta(text.to_string()));
            }
        }

        for call in delta
            .get("tool_calls")
            .and_then(|t| t.as_array())
            .into_iter()
            .flatten()
        {
            let index = call.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            if let Some(id) = call.get("id").and_then(|i| i.as_str()) {
                let name = call["function"]["name"].as_str().unwrap_or_default();
                self.ids.insert(index, id.to_string());
                events.push(ModelEvent::ToolCallStarted {
                    id: id.to_string(),
                    name: name.to_string(),
                });
            }
            let arguments = call["function"]["arguments"].as_str().unwrap_or_default();
            if !arguments.is_empty() {
                let id = self.ids.get(&index).ok_or_else(|| {
                    ProviderError::MalformedResponse(format!(
                        "Argument delta for unknown tool call index {}",
                        index
                    ))
                })?;
                events.push(ModelEvent::ToolCallArgumentDelta {
                    id: id.clone(),
                    delta: arguments.to_string(),
                });
            }
        }

        Ok(events)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ModelReply, ProviderError> {
        let payload = self.build_payload(messages, tools, false)?;
        let response: Value = self.post(payload).await?.json().await?;
        openai_response_to_reply(&response)
    }

    async fn stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ModelEventStream, ProviderError> {
        let payload = self.build_payload(messages, tools, true)?;
        let mut lines = sse_data_stream(self.post(payload).await?);

        Ok(Box::pin(async_stream::stream! {
            let mut state = OpenAiStreamState::default();
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
