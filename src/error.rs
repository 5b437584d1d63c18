//! Error types for authbridge

use thiserror::Error;

use crate::auth::VerifyError;
use crate::outbound::BrokerError;

/// Result type alias for authbridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in authbridge
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication rejected: {0}")]
    AuthRejected(#[from] VerifyError),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Credential resolution failed: {0}")]
    CredentialResolution(#[from] BrokerError),

    #[error("Session construction failed: {0}")]
    SessionConstruction(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Max iterations reached")]
    MaxIterations,
}

/// Coarse failure classes surfaced at the request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthRejected,
    CredentialResolutionFailed,
    SessionConstructionFailed,
    InferenceFailed,
    Internal,
}

impl Error {
    /// Classify this error for the request boundary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AuthRejected(_) => ErrorKind::AuthRejected,
            Error::CredentialResolution(_) => ErrorKind::CredentialResolutionFailed,
            Error::SessionConstruction(_) => ErrorKind::SessionConstructionFailed,
            Error::Llm(_)
            | Error::Tool(_)
            | Error::Http(_)
            | Error::Json(_)
            | Error::MaxIterations => ErrorKind::InferenceFailed,
            Error::Config(_) | Error::Auth(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }
}
