use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ToolResult;

/// An in-process implementation of a `function` tool
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    async fn call(&self, args: Value) -> ToolResult<Value>;
}

#[async_trait]
impl<F> FunctionHandler for F
where
    F: Fn(Value) -> ToolResult<Value> + Send + Sync,
{
    async fn call(&self, args: Value) -> ToolResult<Value> {
        self(args)
    }
}
