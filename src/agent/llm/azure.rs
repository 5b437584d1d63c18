//! Azure OpenAI chat completions client (API key authentication).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

use super::super::message::{Message, Role, ToolCallRequest};
use super::{ChatCompletionResponse, LlmClient, LlmResponse, Usage};

/// Azure OpenAI client bound to one deployment and one API key.
#[derive(Clone)]
pub struct AzureOpenAiClient {
    url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: Client,
}

impl AzureOpenAiClient {
    /// Build a client. Fails if the endpoint or key cannot be used.
    pub fn new(config: &ModelConfig, api_key: &str) -> Result<Self> {
        let base = url::Url::parse(&config.api_base)
            .map_err(|e| Error::SessionConstruction(format!("invalid AZURE_API_BASE: {e}")))?;

        if api_key.trim().is_empty() {
            return Err(Error::SessionConstruction("API key is empty".to_string()));
        }
        let mut key = HeaderValue::from_str(api_key)
            .map_err(|_| Error::SessionConstruction("API key is not a valid header value".to_string()))?;
        key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert("api-key", key);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::SessionConstruction(e.to_string()))?;

        Ok(Self {
            url: build_url(base.as_str(), &config.deployment, &config.api_version),
            model: config.model_identifier(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client,
        })
    }

    fn convert_messages(&self, messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| match m.role {
                Role::System => json!({"role": "system", "content": m.content}),
                Role::User => json!({"role": "user", "content": m.content}),
                Role::Tool => json!({
                    "role": "tool",
                    "tool_call_id": m.tool_call_id.as_deref().unwrap_or("unknown"),
                    "content": m.content
                }),
                Role::Assistant => match m.tool_calls {
                    Some(ref calls) => {
                        let calls: Vec<Value> = calls
                            .iter()
                            .map(|tc| {
                                json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {
                                        "name": tc.name,
                                        "arguments": tc.arguments.to_string()
                                    }
                                })
                            })
                            .collect();
                        let content = if m.content.is_empty() {
                            Value::Null
                        } else {
                            Value::String(m.content.clone())
                        };
                        json!({"role": "assistant", "content": content, "tool_calls": calls})
                    }
                    None => json!({"role": "assistant", "content": m.content}),
                },
            })
            .collect()
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Option<Value> {
        if tools.is_empty() {
            return None;
        }

        let functions: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters
                    }
                })
            })
            .collect();

        Some(Value::Array(functions))
    }

    fn parse_response(&self, response: ChatCompletionResponse) -> Result<LlmResponse> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Llm("No choices in response".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| -> Result<ToolCallRequest> {
                let arguments = if tc.function.arguments.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&tc.function.arguments).map_err(|e| {
                        Error::Llm(format!("Malformed arguments for {}: {e}", tc.function.name))
                    })?
                };
                Ok(ToolCallRequest {
                    id: tc.id,
                    name: tc.function.name,
                    arguments,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let usage = response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens.unwrap_or(0),
                completion_tokens: u.completion_tokens.unwrap_or(0),
                total_tokens: u.total_tokens.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content: choice.message.content,
            tool_calls,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }
}

fn build_url(base: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        base.trim_end_matches('/'),
        deployment,
        api_version
    )
}

#[async_trait]
impl LlmClient for AzureOpenAiClient {
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<LlmResponse> {
        let mut request = json!({
            "messages": self.convert_messages(messages),
            "max_tokens": self.max_tokens,
            "temperature": self.temperature
        });

        if let Some(tools) = self.convert_tools(tools) {
            request["tools"] = tools;
        }

        debug!(model = %self.model, messages = messages.len(), "Calling Azure OpenAI");
        let response = self.client.post(&self.url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(Error::Llm(format!("Azure OpenAI error ({status}): {error_text}")));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Llm(format!("Malformed response: {e}")))?;
        self.parse_response(body)
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}
