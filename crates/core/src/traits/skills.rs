//! Capability traits.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{ConfirmationRequest, ToolDefinition, ToolOutput};

/// Tool interface for atomic operations.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the unique name of the tool.
    fn name(&self) -> &str;

    /// Get the human-readable description.
    fn description(&self) -> &str;

    /// Get the JSON Schema for parameters.
    fn parameters(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> Result<ToolOutput>;

    /// A confirmation the user must give before these arguments run.
    fn confirmation(&self, _args: &Value) -> Option<ConfirmationRequest> {
        None
    }

    /// Definition for listings.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Registry mapping action names to tools.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Register a new tool. Registering a taken name is an error.
    async fn register(&self, tool: Arc<dyn Tool>) -> Result<()>;

    /// Resolve a tool by name, failing with `UnknownCapability`.
    async fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>>;

    /// Sorted names of registered tools.
    async fn list(&self) -> Result<Vec<String>>;

    /// Definitions of registered tools, sorted by name.
    async fn definitions(&self) -> Result<Vec<ToolDefinition>>;

    /// Execute a tool by name with arguments.
    async fn execute(&self, name: &str, args: Value) -> Result<ToolOutput> {
        let tool = self.resolve(name).await?;
        tool.execute(args).await
    }
}
