//! Capability registry.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use cowork_core::{
    traits::{Tool, ToolRegistry},
    types::ToolDefinition,
    Error, Result,
};

/// Default tool registry using DashMap.
///
/// Pure lookup table: retries and isolation belong to the tools themselves.
#[derive(Default)]
pub struct DefaultToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl DefaultToolRegistry {
    /// Create a new tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in tools.
    pub async fn with_builtins() -> Result<Self> {
        let registry = Self::new();
        registry.register(Arc::new(crate::builtin::EchoTool)).await?;
        registry.register(Arc::new(crate::builtin::ChatTool)).await?;
        Ok(registry)
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolRegistry for DefaultToolRegistry {
    async fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(Error::capability("tool name must not be empty"));
        }

        match self.tools.entry(name.clone()) {
            Entry::Occupied(_) => Err(Error::capability(format!(
                "Tool '{}' is already registered",
                name
            ))),
            Entry::Vacant(slot) => {
                tracing::info!(tool = %name, "Registering tool");
                slot.insert(tool);
                Ok(())
            }
        }
    }

    async fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::unknown_capability(name))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tools.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        Ok(names)
    }

    async fn definitions(&self) -> Result<Vec<ToolDefinition>> {
        let mut definitions: Vec<ToolDefinition> =
            self.tools.iter().map(|e| e.value().definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(definitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::EchoTool;
    use cowork_core::mocks::RecordingTool;

    #[tokio::test]
    async fn test_register_and_list() {
        let registry = DefaultToolRegistry::new();
        registry
            .register(Arc::new(RecordingTool::new("list_files", serde_json::json!([]))))
            .await
            .unwrap();
        registry.register(Arc::new(EchoTool)).await.unwrap();

        assert_eq!(registry.list().await.unwrap(), vec!["echo", "list_files"]);
        let defs = registry.definitions().await.unwrap();
        assert_eq!(defs[0].name, "echo");
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let registry = DefaultToolRegistry::new();
        registry.register(Arc::new(EchoTool)).await.unwrap();
        assert!(registry.register(Arc::new(EchoTool)).await.is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_execute() {
        let registry = DefaultToolRegistry::with_builtins().await.unwrap();

        let result = registry
            .execute("echo", serde_json::json!({"message": "Hello"}))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.content.contains("Hello"));
    }

    #[tokio::test]
    async fn test_resolve_unknown() {
        let registry = DefaultToolRegistry::new();

        let result = registry.execute("nonexistent", serde_json::json!({})).await;

        assert!(matches!(result, Err(Error::UnknownCapability(ref n)) if n == "nonexistent"));
    }
}
