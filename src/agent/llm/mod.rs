//! LLM client abstraction layer.
//!
//! This module provides:
//! - [`LlmClient`] trait for swappable LLM providers
//! - [`ClientFactory`] for building a client once the outbound secret is known
//! - The Azure OpenAI implementation

mod types;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::tools::ToolDefinition;
use crate::Result;

pub use types::*;

pub mod azure;

pub use azure::AzureOpenAiClient;

use super::message::{Message, ToolCallRequest};

/// Response from an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Text content of the response.
    pub content: Option<String>,

    /// Tool calls requested by the LLM.
    pub tool_calls: Vec<ToolCallRequest>,

    /// Reason the response finished.
    pub finish_reason: String,

    /// Token usage statistics.
    pub usage: Usage,
}

impl LlmResponse {
    /// Create a simple text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: vec![],
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }

    /// Check if response has tool calls.
    #[inline]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// LLM client trait — swappable provider abstraction.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send messages and get response.
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse>;

    /// Get the model identifier this client talks to.
    fn default_model(&self) -> &str;
}

/// Builds a model client from configuration plus the resolved secret.
pub trait ClientFactory: Send + Sync {
    fn create(&self, config: &ModelConfig, secret: &str) -> Result<Arc<dyn LlmClient>>;
}

/// Factory for [`AzureOpenAiClient`].
pub struct AzureClientFactory;

impl ClientFactory for AzureClientFactory {
    fn create(&self, config: &ModelConfig, secret: &str) -> Result<Arc<dyn LlmClient>> {
        Ok(Arc::new(AzureOpenAiClient::new(config, secret)?))
    }
}

/// Fake LLM client for testing.
#[cfg(test)]
pub struct FakeLlmClient {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<LlmResponse>>>,
}

#[cfg(test)]
impl FakeLlmClient {
    /// Create with predefined text responses.
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: std::sync::Mutex::new(
                responses.iter().map(|s| Ok(LlmResponse::text(*s))).collect(),
            ),
        }
    }

    /// Create with a single tool call followed by a text response.
    pub fn with_tool_call(name: &str, args: serde_json::Value, final_response: &str) -> Self {
        let tool_response = LlmResponse {
            content: None,
            tool_calls: vec![ToolCallRequest {
                id: "tc_1".to_string(),
                name: name.to_string(),
                arguments: args,
            }],
            finish_reason: "tool_calls".to_string(),
            usage: Usage::default(),
        };

        Self {
            responses: std::sync::Mutex::new(
                vec![Ok(tool_response), Ok(LlmResponse::text(final_response))].into(),
            ),
        }
    }

    /// Create with an error followed by text responses.
    pub fn failing_then(message: &str, responses: Vec<&str>) -> Self {
        let mut queue: std::collections::VecDeque<Result<LlmResponse>> =
            responses.iter().map(|s| Ok(LlmResponse::text(*s))).collect();
        queue.push_front(Err(crate::error::Error::Llm(message.to_string())));
        Self {
            responses: std::sync::Mutex::new(queue),
        }
    }

    /// Append a raw response.
    pub fn push(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn chat(
        &self,
        _messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<LlmResponse> {
        let mut responses = self.responses.lock().unwrap();
        responses
            .pop_front()
            .unwrap_or_else(|| Err(crate::error::Error::Llm("No more fake responses".to_string())))
    }

    fn default_model(&self) -> &str {
        "fake-model"
    }
}
