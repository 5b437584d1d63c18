//! Agent loop - model calls interleaved with tool execution

use std::sync::Arc;

use tracing::{debug, info};
use crate::Result;
use crate::error::Error;
use crate::tools::ToolRunner;
use super::llm::LlmClient;
use super::message::{Message, ToolCallRequest};

/// The agent loop processes a prompt through the LLM and tool execution
pub struct AgentLoop {
    client: Arc<dyn LlmClient>,
    max_iterations: usize,
}

impl AgentLoop {
    /// Create a new agent loop
    pub fn new(client: Arc<dyn LlmClient>, max_iterations: usize) -> Self {
        Self {
            client,
            max_iterations,
        }
    }

    /// Run the agent loop for a single prompt and return the final text
    pub async fn run(&self, system_prompt: &str, tools: &ToolRunner, prompt: &str) -> Result<String> {
        let mut messages = vec![Message::system(system_prompt), Message::user(prompt)];
        let definitions = tools.definitions();

        info!(model = self.client.default_model(), chars = prompt.len(), "Starting agent loop");

        for iteration in 0..self.max_iterations {
            debug!("Iteration {}/{}", iteration + 1, self.max_iterations);

            let response = self.client.chat(&messages, &definitions).await?;

            if !response.has_tool_calls() {
                let content = response
                    .content
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| Error::Llm("Response has no text content".to_string()))?;
                info!(
                    chars = content.len(),
                    tokens = response.usage.total_tokens,
                    "Agent completed"
                );
                return Ok(content);
            }

            messages.push(Message::assistant_with_tools(
                response.content.clone().unwrap_or_default(),
                response.tool_calls.clone(),
            ));

            for tool_call in &response.tool_calls {
                let result = self.execute_tool(tools, tool_call).await;
                messages.push(Message::tool_result(&tool_call.id, result));
            }
        }

        Err(Error::MaxIterations)
    }

    async fn execute_tool(&self, tools: &ToolRunner, tool_call: &ToolCallRequest) -> String {
        debug!("Executing tool: {} with args: {}", tool_call.name, tool_call.arguments);

        match tools.execute(&tool_call.name, tool_call.arguments.clone()).await {
            Ok(result) => {
                debug!("Tool {} succeeded: {} chars", tool_call.name, result.len());
                result
            }
            Err(e) => {
                let error_msg = format!("Error: {}", e);
                debug!("Tool {} failed: {}", tool_call.name, error_msg);
                error_msg
            }
        }
    }
}
