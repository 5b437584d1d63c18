//! OIDC discovery and JWKS caching
//!
//! The identity provider is identified by its discovery document. The
//! document names the issuer and the `jwks_uri`; both are fetched lazily on
//! the first verification and cached. The JWKS is refetched after its TTL,
//! or once on demand when a token carries a `kid` we have not seen.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::TrustConfig;
use super::VerifyError;

/// The subset of the OIDC discovery document we rely on.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub jwks_uri: String,
}

/// Issuer plus its signing keys, as of `fetched_at`.
#[derive(Debug)]
pub struct KeySet {
    pub issuer: String,
    pub jwks: JwkSet,
    fetched_at: Instant,
}

impl KeySet {
    /// Look up the key for `kid` to verify an `alg` signature.
    ///
    /// `Ok(None)` when no key carries that `kid`. A key of a different family
    /// than `alg` (an HMAC token naming an RSA key, say) is an error.
    pub fn decoding_key(&self, kid: &str, alg: Algorithm) -> Result<Option<DecodingKey>, VerifyError> {
        let Some(jwk) = self
            .jwks
            .keys
            .iter()
            .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))
        else {
            return Ok(None);
        };

        if !key_fits(&jwk.algorithm, alg) {
            return Err(VerifyError::KeyAlgorithmMismatch {
                kid: kid.to_string(),
                alg: format!("{alg:?}"),
            });
        }

        let invalid = |e: String| VerifyError::Malformed(format!("unusable key {kid}: {e}"));
        let key = match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|e| invalid(e.to_string()))?,
            AlgorithmParameters::EllipticCurve(ec) => DecodingKey::from_ec_components(&ec.x, &ec.y)
                .map_err(|e| invalid(e.to_string()))?,
            AlgorithmParameters::OctetKey(oct) => {
                let secret = URL_SAFE_NO_PAD
                    .decode(&oct.value)
                    .map_err(|e| invalid(e.to_string()))?;
                DecodingKey::from_secret(&secret)
            }
            AlgorithmParameters::OctetKeyPair(okp) => DecodingKey::from_ed_components(&okp.x)
                .map_err(|e| invalid(e.to_string()))?,
        };
        Ok(Some(key))
    }
}

fn key_fits(params: &AlgorithmParameters, alg: Algorithm) -> bool {
    use Algorithm::*;
    match params {
        AlgorithmParameters::RSA(_) => matches!(alg, RS256 | RS384 | RS512 | PS256 | PS384 | PS512),
        AlgorithmParameters::EllipticCurve(_) => matches!(alg, ES256 | ES384),
        AlgorithmParameters::OctetKey(_) => matches!(alg, HS256 | HS384 | HS512),
        AlgorithmParameters::OctetKeyPair(_) => matches!(alg, EdDSA),
    }
}

/// Lazily populated cache of the identity provider's keys.
pub struct KeyStore {
    /// `None` for a store seeded with fixed keys
    discovery_url: Option<String>,
    require_https: bool,
    ttl: Duration,
    refresh_cooldown: Duration,
    http: Client,
    current: Mutex<Option<Arc<KeySet>>>,
}

impl KeyStore {
    /// Create a store that fetches from the configured discovery URL.
    pub fn new(trust: &TrustConfig) -> Result<Self, VerifyError> {
        check_url(&trust.discovery_url, trust.require_https)?;

        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(VerifyError::Discovery)?;

        Ok(Self {
            discovery_url: Some(trust.discovery_url.clone()),
            require_https: trust.require_https,
            ttl: Duration::from_secs(trust.jwks_ttl_secs),
            refresh_cooldown: Duration::from_secs(trust.refresh_cooldown_secs),
            http,
            current: Mutex::new(None),
        })
    }

    /// Create a store with a fixed issuer and key set that is never refetched.
    pub fn preloaded(issuer: impl Into<String>, jwks: JwkSet) -> Self {
        Self {
            discovery_url: None,
            require_https: false,
            ttl: Duration::MAX,
            refresh_cooldown: Duration::MAX,
            http: Client::new(),
            current: Mutex::new(Some(Arc::new(KeySet {
                issuer: issuer.into(),
                jwks,
                fetched_at: Instant::now(),
            }))),
        }
    }

    /// Return the cached key set, fetching it if absent or stale.
    ///
    /// `force_refresh` refetches early, but never sooner than the refresh
    /// cooldown after the previous fetch; within the cooldown the cached set
    /// is returned as is.
    pub async fn key_set(&self, force_refresh: bool) -> Result<Arc<KeySet>, VerifyError> {
        let mut current = self.current.lock().await;

        if let Some(keys) = current.as_ref() {
            let age = keys.fetched_at.elapsed();
            let fresh = age < self.ttl;
            if self.discovery_url.is_none() || (fresh && !force_refresh) {
                return Ok(Arc::clone(keys));
            }
            if fresh && age < self.refresh_cooldown {
                debug!(age_secs = age.as_secs(), "JWKS refreshed recently, skipping forced refetch");
                return Ok(Arc::clone(keys));
            }
        }

        let Some(discovery_url) = self.discovery_url.as_deref() else {
            return Err(VerifyError::Malformed("no keys available".to_string()));
        };

        let keys = Arc::new(self.fetch(discovery_url).await?);
        *current = Some(Arc::clone(&keys));
        Ok(keys)
    }

    async fn fetch(&self, discovery_url: &str) -> Result<KeySet, VerifyError> {
        debug!(url = %discovery_url, "Fetching OIDC discovery document");
        let document: DiscoveryDocument = self
            .http
            .get(discovery_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        check_url(&document.jwks_uri, self.require_https)?;

        debug!(url = %document.jwks_uri, "Fetching JWKS");
        let jwks: JwkSet = self
            .http
            .get(&document.jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        info!(issuer = %document.issuer, keys = jwks.keys.len(), "Loaded identity provider keys");

        Ok(KeySet {
            issuer: document.issuer,
            jwks,
            fetched_at: Instant::now(),
        })
    }
}

fn check_url(raw: &str, require_https: bool) -> Result<(), VerifyError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| VerifyError::InsecureUrl(format!("{raw}: {e}")))?;
    if require_https && parsed.scheme() != "https" {
        return Err(VerifyError::InsecureUrl(raw.to_string()));
    }
    Ok(())
}
