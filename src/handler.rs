//! Request orchestration: outbound secret, session, inference.
//!
//! Inbound verification happens before [`handle`] runs. Every failure past
//! that point is recovered here and turned into response text.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::agent::{AzureClientFactory, ClientFactory, SessionManager};
use crate::auth::{InboundVerifier, VerifiedIdentity};
use crate::config::Config;
use crate::error::Error;
use crate::outbound::{CredentialBroker, CredentialCache, HttpCredentialBroker};
use crate::tools::ToolRunner;
use crate::Result;

/// Prefix of every error answer.
pub const ERROR_PREFIX: &str = "エラーが発生しました: ";

/// Invocation payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvocationRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Outcome of one invocation. Both variants render as plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationResponse {
    Text(String),
    Error(String),
}

impl InvocationResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, InvocationResponse::Error(_))
    }

    pub fn into_text(self) -> String {
        match self {
            InvocationResponse::Text(text) | InvocationResponse::Error(text) => text,
        }
    }
}

/// Per-request lifecycle, logged as the request advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Received,
    SecretResolving,
    SecretReady,
    SessionReady,
    Inferring,
    Responded,
    RespondedWithError,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Received => "RECEIVED",
            Phase::SecretResolving => "SECRET_RESOLVING",
            Phase::SecretReady => "SECRET_READY",
            Phase::SessionReady => "SESSION_READY",
            Phase::Inferring => "INFERRING",
            Phase::Responded => "RESPONDED",
            Phase::RespondedWithError => "RESPONDED_WITH_ERROR",
        };
        f.write_str(name)
    }
}

/// Process-wide state shared by every request.
pub struct AppContext {
    pub config: Config,
    pub verifier: Arc<InboundVerifier>,
    pub credentials: CredentialCache,
    pub sessions: SessionManager,
    pub tools: ToolRunner,
}

impl AppContext {
    /// Wire up the production collaborators from configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let verifier = InboundVerifier::new(&config.inbound)
            .map_err(|e| Error::Config(format!("Inbound trust: {e}")))?;
        let broker = HttpCredentialBroker::new(&config.broker);
        Ok(Self::new(
            config,
            verifier,
            Arc::new(broker),
            Arc::new(AzureClientFactory),
        ))
    }

    pub fn new(
        config: Config,
        verifier: InboundVerifier,
        broker: Arc<dyn CredentialBroker>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        let credentials =
            CredentialCache::new(broker, Duration::from_secs(config.broker.timeout_secs));
        let sessions = SessionManager::new(
            config.model.clone(),
            config.agent.max_iterations,
            factory,
        );
        Self {
            verifier: Arc::new(verifier),
            credentials,
            sessions,
            tools: ToolRunner::new_with_defaults(),
            config,
        }
    }
}

/// Answer one verified invocation.
pub async fn handle(
    ctx: &AppContext,
    identity: Option<&VerifiedIdentity>,
    request: InvocationRequest,
) -> InvocationResponse {
    let client = identity.map(|id| id.client_id.as_str()).unwrap_or("-");
    debug!(phase = %Phase::Received, client, "Invocation received");

    match run(ctx, request).await {
        Ok(text) => {
            info!(phase = %Phase::Responded, client, chars = text.len(), "Invocation answered");
            InvocationResponse::Text(text)
        }
        Err(e) => {
            error!(
                phase = %Phase::RespondedWithError,
                client,
                kind = ?e.kind(),
                error = %e,
                "Invocation failed"
            );
            InvocationResponse::Error(format!("{ERROR_PREFIX}{e}"))
        }
    }
}

async fn run(ctx: &AppContext, request: InvocationRequest) -> Result<String> {
    let provider = &ctx.config.broker.provider_name;

    debug!(phase = %Phase::SecretResolving, provider = %provider);
    let credential = ctx.credentials.resolve(provider).await?;
    debug!(phase = %Phase::SecretReady, provider = %provider);

    let session = ctx
        .sessions
        .get_or_create(
            &credential.secret_value,
            &ctx.tools,
            &ctx.config.agent.system_prompt,
        )
        .await?;
    debug!(phase = %Phase::SessionReady, model = %session.model_identifier());

    let prompt = request
        .prompt
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| ctx.config.agent.default_prompt.clone());

    debug!(phase = %Phase::Inferring, chars = prompt.len());
    session.infer(&prompt).await
}
