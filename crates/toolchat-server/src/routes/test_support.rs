use crate::state::AppState;
use async_trait::async_trait;
use futures::stream;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use toolchat::errors::{ProviderError, ToolResult};
use toolchat::executor::ToolExecutor;
use toolchat::models::message::Message;
use toolchat::models::tool::{NewTool, Tool, ToolType};
use toolchat::orchestrator::{Orchestrator, OrchestratorConfig};
use toolchat::providers::base::{ModelEvent, ModelEventStream, ModelReply, Provider};
use toolchat::registry::{default_tools, InMemoryRegistry};

/// A provider answering from a fixed script, or failing every call
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ModelReply>>,
    fail: bool,
    hang: Option<Arc<AtomicBool>>,
}

// Raises its flag when the call holding it is dropped
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl ScriptedProvider {
    pub fn new(replies: Vec<ModelReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fail: false,
            hang: None,
        }
    }

    /// Never answers; the flag is set once the pending call is abandoned
    pub fn hanging() -> (Self, Arc<AtomicBool>) {
        let dropped = Arc::new(AtomicBool::new(false));
        let provider = Self {
            replies: Mutex::new(VecDeque::new()),
            fail: false,
            hang: Some(dropped.clone()),
        };
        (provider, dropped)
    }

    pub fn failing() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fail: true,
            hang: None,
        }
    }

    fn next(&self) -> Result<ModelReply, ProviderError> {
        if self.fail {
            return Err(ProviderError::Network("connection refused".into()));
        }
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ModelReply::Text {
                content: String::new(),
            }))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _tools: &[Tool],
    ) -> Result<ModelReply, ProviderError> {
        if let Some(dropped) = &self.hang {
            let _flag = DropFlag(dropped.clone());
            futures::future::pending::<()>().await;
        }
        self.next()
    }

    async fn stream(
        &self,
        _messages: &[Message],
        _tools: &[Tool],
    ) -> Result<ModelEventStream, ProviderError> {
        let mut events = Vec::new();
        match self.next()? {
            ModelReply::Text { content } => events.push(ModelEvent::ContentDelta(content)),
            ModelReply::ToolCalls {
                content,
                tool_calls,
            } => {
                if let Some(content) = content {
                    events.push(ModelEvent::ContentDelta(content));
                }
                for call in tool_calls {
                    events.push(ModelEvent::ToolCallStarted {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                    });
                    events.push(ModelEvent::ToolCallArgumentDelta {
                        id: call.id,
                        delta: call.function.arguments,
                    });
                }
            }
        }
        events.push(ModelEvent::Done);
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

/// State with the default tools plus an in-process `echo` function
pub async fn app_state(provider: ScriptedProvider, stream: bool) -> (AppState, Arc<InMemoryRegistry>) {
    let mut tools = default_tools();
    tools.push(NewTool::new(
        "echo",
        "Echo the arguments back",
        ToolType::Function,
        json!({"type": "object", "properties": {"word": {"type": "string"}}}),
    ));
    let registry = Arc::new(InMemoryRegistry::with_tools(tools).await.unwrap());
    let executor = ToolExecutor::new(registry.clone())
        .unwrap()
        .with_function("echo", |args: Value| -> ToolResult<Value> { Ok(args) });
    let orchestrator = Orchestrator::new(Arc::new(provider), registry.clone(), executor)
        .with_config(OrchestratorConfig {
            max_rounds: 5,
            stream,
        });

    (
        AppState {
            orchestrator: Arc::new(orchestrator),
            registry: registry.clone(),
        },
        registry,
    )
}
