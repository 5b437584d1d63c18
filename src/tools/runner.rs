//! Tool runner - the ordered tool set handed to a session

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use crate::Result;
use crate::error::Error;
use super::Tool;
use super::calculator::CalculatorTool;
use super::weather::WeatherTool;

/// Tool definition for LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Ordered set of registered tools. Cloning shares the tools.
#[derive(Clone)]
pub struct ToolRunner {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRunner {
    /// Create an empty tool runner
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
        }
    }

    /// Create a tool runner with the default tools
    pub fn new_with_defaults() -> Self {
        let mut runner = Self::new();
        runner.register(CalculatorTool);
        runner.register(WeatherTool);
        runner
    }

    /// Register a tool, replacing any existing tool with the same name
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let tool: Arc<dyn Tool> = Arc::new(tool);
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(idx) => self.tools[idx] = tool,
            None => self.tools.push(tool),
        }
    }

    /// Get tool definitions for LLM, in registration order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter()
            .map(|t| t.to_definition())
            .collect()
    }

    /// Execute a tool by name
    pub async fn execute(&self, name: &str, params: Value) -> Result<String> {
        let tool = self.tools.iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| Error::Tool(format!("Unknown tool: {}", name)))?;

        debug!(tool = %name, "Executing tool");
        tool.execute(params).await
    }

    /// Check if a tool exists
    pub fn has(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    /// List registered tool names
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self::new()
    }
}
