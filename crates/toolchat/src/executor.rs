//! Runs registered tools.
//!
//! Arguments are validated against the tool's input schema before anything
//! is dispatched, and every attempt is appended to the registry's execution
//! log before its outcome is returned.

pub mod function;
pub mod query;
pub mod webhook;

use anyhow::Result;
use jsonschema::JSONSchema;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::errors::{ToolError, ToolResult};
use crate::models::tool::{Tool, ToolType};
use crate::registry::ToolRegistry;
use function::FunctionHandler;
use query::QueryBackend;

#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<dyn ToolRegistry>,
    client: Client,
    query_backend: Option<Arc<dyn QueryBackend>>,
    functions: Arc<HashMap<String, Arc<dyn FunctionHandler>>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<dyn ToolRegistry>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            registry,
            client,
            query_backend: None,
            functions: Arc::new(HashMap::new()),
        })
    }

    /// Use this backend for `client` tools
    pub fn with_query_backend(mut self, backend: Arc<dyn QueryBackend>) -> Self {
        self.query_backend = Some(backend);
        self
    }

    /// Handle the `function` tool with this name in process
    pub fn with_function<N, H>(mut self, name: N, handler: H) -> Self
    where
        N: Into<String>,
        H: FunctionHandler + 'static,
    {
        Arc::make_mut(&mut self.functions).insert(name.into(), Arc::new(handler));
        self
    }

    /// Validate, dispatch and log one tool call
    pub async fn execute(&self, tool: &Tool, args: Value) -> ToolResult<Value> {
        tracing::debug!("executing tool {} with {}", tool.name, args);

        let outcome = match validate_arguments(&tool.input_schema, &args) {
            Ok(()) => self.dispatch(tool, &args).await,
            Err(err) => Err(err),
        };

        match &outcome {
            Ok(_) => tracing::info!("tool {} completed", tool.name),
            Err(err) => tracing::warn!("tool {} failed: {}", tool.name, err),
        }

        if let Err(err) = self.registry.record_execution(tool.id, args, &outcome).await {
            tracing::error!("failed to record execution of tool {}: {}", tool.name, err);
        }

        outcome
    }

    /// Run [`ToolExecutor::execute`] on its own task. The execution is logged
    /// even if the returned handle is dropped before it completes.
    pub fn spawn(&self, tool: Tool, args: Value) -> JoinHandle<ToolResult<Value>> {
        let executor = self.clone();
        tokio::spawn(async move { executor.execute(&tool, args).await })
    }

    async fn dispatch(&self, tool: &Tool, args: &Value) -> ToolResult<Value> {
        match tool.tool_type {
            ToolType::Webhook => webhook::call(&self.client, &tool.config, args).await,
            ToolType::Client => {
                let backend = self.query_backend.as_ref().ok_or_else(|| {
                    ToolError::backend(format!("No query backend configured for tool '{}'", tool.name))
                })?;
                query::run(backend.as_ref(), args).await
            }
            ToolType::Function => {
                let handler = self.functions.get(&tool.name).ok_or_else(|| {
                    ToolError::backend(format!("No handler registered for function '{}'", tool.name))
                })?;
                handler.call(args.clone()).await
            }
        }
    }
}

/// Check arguments against a JSON schema, collecting every violation
pub fn validate_arguments(schema: &Value, args: &Value) -> ToolResult<()> {
    let compiled = JSONSchema::compile(schema)
        .map_err(|e| ToolError::Validation(format!("Invalid tool schema: {}", e)))?;

    if let Err(errors) = compiled.validate(args) {
        let messages: Vec<String> = errors
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect();
        return Err(ToolError::Validation(messages.join("; ")));
    }

    Ok(())
}
