//! Tool Registry
//!
//! Information Hiding:
//! - Tool storage and lookup implementation hidden
//! - Conversion of tool errors into failed results hidden from the model client

use super::{shell::CommandTool, Tool, ToolMetadata, ToolResult};
use crate::config::ToolsConfig;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Tool registry for managing available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a new tool
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.metadata().name.clone();
        tracing::info!("Registering tool: {}", name);
        self.tools.insert(name, tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool exists
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get all tool metadata, sorted by name
    pub fn list_tools(&self) -> Vec<ToolMetadata> {
        let mut tools: Vec<ToolMetadata> = self.tools.values().map(|tool| tool.metadata()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Tool definitions in the shape the Messages API expects
    pub fn schemas(&self) -> Vec<Value> {
        self.list_tools()
            .into_iter()
            .map(|metadata| {
                json!({
                    "name": metadata.name,
                    "description": metadata.description,
                    "input_schema": metadata.input_schema(),
                })
            })
            .collect()
    }

    /// Run a tool by name. Unknown tools, validation errors and execution
    /// errors all come back as a failed result.
    pub async fn invoke(&self, name: &str, args: Value) -> ToolResult {
        let Some(tool) = self.get(name) else {
            tracing::warn!("[ToolRegistry] Unknown tool '{}'", name);
            return ToolResult::failure(String::new(), 1, format!("Tool '{}' not found", name));
        };

        match tool.execute(args).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("[ToolRegistry] Tool '{}' failed: {}", name, e);
                ToolResult::failure(String::new(), 1, e.to_string())
            }
        }
    }

    /// Create a default registry with the terminal command tool
    pub fn with_defaults(config: &ToolsConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CommandTool::from_config(config)));
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
