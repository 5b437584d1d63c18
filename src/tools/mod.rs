//! Tools module - functions the model may call mid-inference
//!
//! The tool set is fixed at process start: an arithmetic calculator and a
//! fixed-answer weather lookup.

mod runner;
mod calculator;
mod weather;

pub use runner::{ToolRunner, ToolDefinition};
pub use calculator::CalculatorTool;
pub use weather::WeatherTool;

use async_trait::async_trait;
use serde_json::Value;
use crate::Result;

/// Tool trait - interface for all agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls
    fn name(&self) -> &str;

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    /// Execute the tool with given parameters
    async fn execute(&self, params: Value) -> Result<String>;

    /// Convert to tool definition for LLM
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}
