//! Wire types for Azure OpenAI chat completions responses.

use serde::Deserialize;

/// Top-level chat completions response.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub usage: Option<UsageBlock>,
}

/// A single response choice.
#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
    pub finish_reason: Option<String>,
}

/// Assistant message inside a choice.
#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallBlock>>,
}

/// Function call requested by the model.
#[derive(Debug, Deserialize)]
pub struct ToolCallBlock {
    pub id: String,
    pub function: FunctionBlock,
}

/// Function name plus JSON-encoded arguments.
#[derive(Debug, Deserialize)]
pub struct FunctionBlock {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// Token usage block.
#[derive(Debug, Deserialize)]
pub struct UsageBlock {
    pub prompt_tokens: Option<usize>,
    pub completion_tokens: Option<usize>,
    pub total_tokens: Option<usize>,
}
