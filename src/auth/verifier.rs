//! Inbound bearer token verification.
//!
//! A token is accepted when:
//! 1. its header names an allowed algorithm and a `kid`,
//! 2. the `kid` resolves to a key in the identity provider's JWKS
//!    (refreshing the JWKS once if it does not),
//! 3. the signature, `exp` and `iss` check out against that key and the
//!    issuer from the discovery document,
//! 4. the client identifier (`client_id`, or `aud` for ID tokens) is on the
//!    allow-list.

use std::collections::HashSet;
use std::str::FromStr;

use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TrustConfig;
use super::discovery::KeyStore;
use super::VerifyError;

/// Identity extracted from an accepted token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub client_id: String,
    pub issuer: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    iss: String,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    aud: Option<serde_json::Value>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenClaims {
    /// Candidate client identifiers, in order of preference.
    fn client_ids(&self) -> Vec<&str> {
        if let Some(id) = self.client_id.as_deref() {
            return vec![id];
        }
        match &self.aud {
            Some(serde_json::Value::String(s)) => vec![s.as_str()],
            Some(serde_json::Value::Array(items)) => {
                items.iter().filter_map(|v| v.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Validates bearer tokens against the configured trust boundary.
pub struct InboundVerifier {
    keys: KeyStore,
    allowed_clients: HashSet<String>,
    algorithms: Vec<Algorithm>,
    leeway_secs: u64,
}

impl InboundVerifier {
    /// Create a verifier that discovers keys from `trust.discovery_url`.
    pub fn new(trust: &TrustConfig) -> Result<Self, VerifyError> {
        let keys = KeyStore::new(trust)?;
        Self::with_key_store(trust, keys)
    }

    /// Create a verifier over an existing key store.
    pub fn with_key_store(trust: &TrustConfig, keys: KeyStore) -> Result<Self, VerifyError> {
        let algorithms = trust
            .algorithms
            .iter()
            .map(|name| {
                Algorithm::from_str(name)
                    .map_err(|_| VerifyError::UnsupportedAlgorithm(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            keys,
            allowed_clients: trust.allowed_clients.iter().cloned().collect(),
            algorithms,
            leeway_secs: trust.leeway_secs,
        })
    }

    /// Verify a raw token (without the `Bearer ` prefix).
    pub async fn verify(&self, token: &str) -> Result<VerifiedIdentity, VerifyError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| VerifyError::Malformed(e.to_string()))?;

        if !self.algorithms.contains(&header.alg) {
            return Err(VerifyError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let kid = header.kid.as_deref().ok_or(VerifyError::MissingKeyId)?;

        let mut keys = self.keys.key_set(false).await?;
        let key = match keys.decoding_key(kid, header.alg)? {
            Some(key) => key,
            None => {
                debug!(kid = %kid, "Unknown key ID, refreshing JWKS");
                keys = self.keys.key_set(true).await?;
                keys.decoding_key(kid, header.alg)?
                    .ok_or_else(|| VerifyError::UnknownKeyId(kid.to_string()))?
            }
        };

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway_secs;
        validation.validate_aud = false;
        validation.set_issuer(&[keys.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        let claims = jsonwebtoken::decode::<TokenClaims>(token, &key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => VerifyError::IssuerMismatch {
                    expected: keys.issuer.clone(),
                },
                _ => VerifyError::Jwt(e),
            })?
            .claims;

        let candidates = claims.client_ids();
        if candidates.is_empty() {
            return Err(VerifyError::MissingClientId);
        }
        let client_id = candidates
            .iter()
            .find(|id| self.allowed_clients.contains(**id))
            .ok_or_else(|| VerifyError::ClientNotAllowed(candidates.join(",")))?
            .to_string();

        Ok(VerifiedIdentity {
            subject: claims.sub.unwrap_or_default(),
            client_id,
            issuer: claims.iss,
            scopes: claims
                .scope
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
        })
    }
}

/// Extract the token from an `Authorization` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, VerifyError> {
    let value = header.ok_or(VerifyError::MissingToken)?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or(VerifyError::MissingToken)?
        .trim();
    if token.is_empty() {
        return Err(VerifyError::MissingToken);
    }
    Ok(token)
}
