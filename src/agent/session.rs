//! Agent session and its process-wide singleton manager.
//!
//! The session is built lazily from the first resolved secret and then kept
//! for the life of the process. Later calls to [`SessionManager::get_or_create`]
//! return the existing session and ignore the secret they are given, so a
//! secret rotated at the broker is not picked up without a restart.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ModelConfig;
use crate::error::Error;
use crate::tools::ToolRunner;
use crate::Result;

use super::llm::ClientFactory;
use super::loop_impl::AgentLoop;

/// Fixed inference parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelParameters {
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A constructed model client with its tools and system prompt.
pub struct AgentSession {
    model_identifier: String,
    parameters: ModelParameters,
    tools: ToolRunner,
    system_prompt: String,
    agent: AgentLoop,
    inference_timeout: Duration,
}

impl AgentSession {
    pub fn model_identifier(&self) -> &str {
        &self.model_identifier
    }

    pub fn parameters(&self) -> ModelParameters {
        self.parameters
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Answer a prompt, calling tools as the model requests them.
    pub async fn infer(&self, prompt: &str) -> Result<String> {
        tokio::time::timeout(
            self.inference_timeout,
            self.agent.run(&self.system_prompt, &self.tools, prompt),
        )
        .await
        .map_err(|_| {
            Error::Llm(format!(
                "inference timed out after {}s",
                self.inference_timeout.as_secs()
            ))
        })?
    }
}

/// Owns the single [`AgentSession`] of the process.
pub struct SessionManager {
    model: ModelConfig,
    max_iterations: usize,
    factory: Arc<dyn ClientFactory>,
    slot: Mutex<Option<Arc<AgentSession>>>,
    constructions: AtomicUsize,
}

impl SessionManager {
    pub fn new(model: ModelConfig, max_iterations: usize, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            model,
            max_iterations,
            factory,
            slot: Mutex::new(None),
            constructions: AtomicUsize::new(0),
        }
    }

    /// Return the session, constructing it on first use.
    pub async fn get_or_create(
        &self,
        secret: &str,
        tools: &ToolRunner,
        system_prompt: &str,
    ) -> Result<Arc<AgentSession>> {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(Arc::clone(session));
        }

        let model_identifier = self.model.model_identifier();
        info!(model = %model_identifier, "Initializing agent session");

        let client = self.factory.create(&self.model, secret).map_err(|e| {
            warn!(model = %model_identifier, error = %e, "Session construction failed");
            match e {
                Error::SessionConstruction(_) => e,
                other => Error::SessionConstruction(other.to_string()),
            }
        })?;

        let session = Arc::new(AgentSession {
            model_identifier,
            parameters: ModelParameters {
                max_tokens: self.model.max_tokens,
                temperature: self.model.temperature,
            },
            tools: tools.clone(),
            system_prompt: system_prompt.to_string(),
            agent: AgentLoop::new(client, self.max_iterations),
            inference_timeout: Duration::from_secs(self.model.timeout_secs),
        });
        self.constructions.fetch_add(1, Ordering::SeqCst);
        info!(
            model = %session.model_identifier,
            tools = ?session.tools.tool_names(),
            "Agent session ready"
        );

        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    /// The session, if constructed. Never constructs one.
    pub async fn current(&self) -> Option<Arc<AgentSession>> {
        self.slot.lock().await.clone()
    }

    /// How many sessions have been built (0 or 1 over a process lifetime).
    pub fn construction_count(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}
