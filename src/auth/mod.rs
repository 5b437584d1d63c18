//! Authentication module for inbound tokens
//!
//! This module provides:
//! - OIDC discovery and JWKS caching
//! - Bearer token verification against an allow-list of client IDs
//! - A password-flow login client for obtaining bearer tokens
//! - Token file storage for the CLI

mod discovery;
mod verifier;
mod cognito;
mod token_file;

pub use discovery::{DiscoveryDocument, KeySet, KeyStore};
pub use verifier::{bearer_token, InboundVerifier, VerifiedIdentity};
pub use cognito::CognitoClient;
pub use token_file::{TokenGrant, load_token_env, save_token_env, token_env_path};

use thiserror::Error;

/// Reasons an inbound token is rejected.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token verification failed: {0}")]
    Jwt(jsonwebtoken::errors::Error),

    #[error("token header has no 'kid'")]
    MissingKeyId,

    #[error("unknown key ID: {0}")]
    UnknownKeyId(String),

    #[error("key {kid} cannot verify {alg} signatures")]
    KeyAlgorithmMismatch { kid: String, alg: String },

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("issuer mismatch, expected {expected}")]
    IssuerMismatch { expected: String },

    #[error("token carries no client identifier")]
    MissingClientId,

    #[error("client not allowed: {0}")]
    ClientNotAllowed(String),

    #[error("insecure or invalid identity provider URL: {0}")]
    InsecureUrl(String),

    #[error("identity provider unreachable: {0}")]
    Discovery(#[from] reqwest::Error),
}
