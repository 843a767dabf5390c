use async_trait::async_trait;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use std::path::Path;
use tokio::sync::RwLock;

use crate::errors::{RegistryError, ToolResult};
use crate::models::tool::{NewTool, Tool, ToolExecution, ToolType};

lazy_static! {
    static ref TOOL_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").unwrap();
}

/// Where tools are looked up and executions are logged.
///
/// The orchestrator only reads the catalog; the executor is the single writer
/// of the execution log.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// All registered tools, in registration order
    async fn list_tools(&self) -> Result<Vec<Tool>, RegistryError>;

    async fn get_tool(&self, name: &str) -> Result<Option<Tool>, RegistryError>;

    /// Append one execution record. Records are never updated afterwards.
    async fn record_execution(
        &self,
        tool_id: i64,
        input: Value,
        outcome: &ToolResult<Value>,
    ) -> Result<ToolExecution, RegistryError>;

    async fn list_executions(&self) -> Result<Vec<ToolExecution>, RegistryError>;
}

#[derive(Default)]
struct RegistryState {
    tools: Vec<Tool>,
    executions: Vec<ToolExecution>,
}

/// A registry held in process memory
#[derive(Default)]
pub struct InMemoryRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry holding the given definitions
    pub async fn with_tools(tools: Vec<NewTool>) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for tool in tools {
            registry.register(tool).await?;
        }
        Ok(registry)
    }

    /// Validate and add a tool, assigning its id and timestamps
    pub async fn register(&self, tool: NewTool) -> Result<Tool, RegistryError> {
        validate_definition(&tool)?;

        let mut state = self.state.write().await;
        if state.tools.iter().any(|t| t.name == tool.name) {
            return Err(RegistryError::DuplicateName(tool.name));
        }

        let now = Utc::now();
        let id = state.tools.last().map_or(1, |t| t.id + 1);
        let tool = Tool {
            id,
            name: tool.name,
            description: tool.description,
            tool_type: tool.tool_type,
            input_schema: tool.input_schema,
            config: tool.config,
            created_at: now,
            updated_at: now,
        };
        state.tools.push(tool.clone());

        tracing::info!(tool = %tool.name, id, kind = %tool.tool_type, "registered tool");
        Ok(tool)
    }

    /// Register every definition in a JSON file holding an array of tools
    pub async fn load_file(&self, path: impl AsRef<Path>) -> Result<Vec<Tool>, RegistryError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RegistryError::Storage(format!("{}: {}", path.display(), e)))?;
        let definitions: Vec<NewTool> = serde_json::from_str(&raw)
            .map_err(|e| RegistryError::InvalidDefinition(format!("{}: {}", path.display(), e)))?;

        let mut tools = Vec::with_capacity(definitions.len());
        for definition in definitions {
            tools.push(self.register(definition).await?);
        }
        Ok(tools)
    }
}

fn validate_definition(tool: &NewTool) -> Result<(), RegistryError> {
    if !TOOL_NAME.is_match(&tool.name) {
        return Err(RegistryError::InvalidName(tool.name.clone()));
    }
    if tool.description.trim().is_empty() {
        return Err(RegistryError::InvalidDefinition(format!(
            "tool '{}' needs a description",
            tool.name
        )));
    }
    if tool.input_schema.get("type").and_then(Value::as_str) != Some("object") {
        return Err(RegistryError::InvalidSchema(format!(
            "tool '{}' must take an object, got {}",
            tool.name, tool.input_schema["type"]
        )));
    }
    if jsonschema::JSONSchema::compile(&tool.input_schema).is_err() {
        return Err(RegistryError::InvalidSchema(format!(
            "tool '{}' has a schema that does not compile",
            tool.name
        )));
    }
    if !(tool.config.is_null() || tool.config.is_object()) {
        return Err(RegistryError::InvalidDefinition(format!(
            "config of tool '{}' must be an object",
            tool.name
        )));
    }
    Ok(())
}

#[async_trait]
impl ToolRegistry for InMemoryRegistry {
    async fn list_tools(&self) -> Result<Vec<Tool>, RegistryError> {
        Ok(self.state.read().await.tools.clone())
    }

    async fn get_tool(&self, name: &str) -> Result<Option<Tool>, RegistryError> {
        Ok(self
            .state
            .read()
            .await
            .tools
            .iter()
            .find(|t| t.name == name)
            .cloned())
    }

    async fn record_execution(
        &self,
        tool_id: i64,
        input: Value,
        outcome: &ToolResult<Value>,
    ) -> Result<ToolExecution, RegistryError> {
        let mut state = self.state.write().await;
        let (output, error) = match outcome {
            Ok(output) => (Some(output.clone()), None),
            Err(err) => (None, Some(err.to_string())),
        };
        let execution = ToolExecution {
            id: state.executions.len() as i64 + 1,
            tool_id,
            input,
            output,
            error,
            created_at: Utc::now(),
        };
        state.executions.push(execution.clone());
        Ok(execution)
    }

    async fn list_executions(&self) -> Result<Vec<ToolExecution>, RegistryError> {
        Ok(self.state.read().await.executions.clone())
    }
}

/// The tools offered when no definitions are configured: a warehouse query
pub fn default_tools() -> Vec<NewTool> {
    vec![NewTool::new(
        "bigquery",
        "Execute a SQL query against BigQuery and return the resulting rows",
        ToolType::Client,
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Standard SQL to run"
                }
            },
            "required": ["query"]
        }),
    )]
}
