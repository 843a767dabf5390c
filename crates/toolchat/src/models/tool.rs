use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum_macros::{Display, EnumString};

use crate::errors::{ToolError, ToolResult};

/// How a registered tool is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ToolType {
    /// Described by schema only, executed by an in-process handler
    Function,
    /// An HTTP request built from the tool's config
    Webhook,
    /// A backend call such as a warehouse query, run under a resource ceiling
    Client,
}

/// A tool that has been registered and can be offered to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub id: i64,
    /// Unique, slug-like name
    pub name: String,
    /// Feeds the model's tool selection
    pub description: String,
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    /// JSON Schema for the arguments; its `type` is always `"object"`
    pub input_schema: Value,
    /// Execution backend parameters, shape depends on `tool_type`
    #[serde(default)]
    pub config: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A tool definition that has not been registered yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTool {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub input_schema: Value,
    #[serde(default)]
    pub config: Value,
}

impl NewTool {
    pub fn new<N, D>(name: N, description: D, tool_type: ToolType, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        NewTool {
            name: name.into(),
            description: description.into(),
            tool_type,
            input_schema,
            config: json!({}),
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    #[default]
    Pending,
    Executing,
    Completed,
    Failed,
}

impl ToolCallStatus {
    /// Whether `next` directly follows this status: pending, executing, then
    /// completed or failed. Nothing is skipped or revisited.
    pub fn can_transition_to(self, next: ToolCallStatus) -> bool {
        use ToolCallStatus::*;
        matches!(
            (self, next),
            (Pending, Executing) | (Executing, Completed) | (Executing, Failed)
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(self, ToolCallStatus::Completed | ToolCallStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON text as issued by the model; parsed only at execution time
    #[serde(default)]
    pub arguments: String,
}

/// A single invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
    #[serde(default)]
    pub status: ToolCallStatus,
}

impl ToolCall {
    pub fn new<I, N, A>(id: I, name: N, arguments: A) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        A: Into<String>,
    {
        ToolCall {
            id: id.into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
            status: ToolCallStatus::Pending,
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Decode the raw arguments. Blank arguments are read as an empty object.
    pub fn parse_arguments(&self) -> ToolResult<Value> {
        let raw = self.function.arguments.trim();
        if raw.is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(raw).map_err(|e| {
            ToolError::InvalidArguments(format!(
                "Could not interpret arguments for tool call {}: {}",
                self.id, e
            ))
        })
    }
}

/// Append-only audit record of one tool dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecution {
    pub id: i64,
    pub tool_id: i64,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
