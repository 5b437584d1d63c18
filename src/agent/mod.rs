//! Agent module — model session and tool loop.
//!
//! This module contains:
//! - Message types exchanged with the model
//! - LLM client trait and the Azure OpenAI implementation
//! - Agent loop interleaving model calls with tool execution
//! - The process-wide session singleton

mod loop_impl;
mod message;
mod session;

// LLM providers in submodule
pub mod llm;

// Re-exports for convenience
pub use llm::{AzureClientFactory, AzureOpenAiClient, ClientFactory, LlmClient, LlmResponse, Usage};
pub use loop_impl::AgentLoop;
pub use message::{Message, Role, ToolCallRequest};
pub use session::{AgentSession, ModelParameters, SessionManager};
