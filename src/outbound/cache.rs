//! Single-slot outbound credential cache.
//!
//! Two states: unresolved (`None`) and resolved (`Some`). The slot mutex is
//! held across the broker call, so concurrent first callers queue behind one
//! fetch and then observe its result instead of issuing their own. A failed,
//! timed out or cancelled fetch leaves the slot empty and releases the lock;
//! the next caller retries.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::broker::CredentialBroker;
use super::{mask_secret, BrokerError};

/// A secret obtained from the broker.
#[derive(Clone)]
pub struct OutboundCredential {
    pub provider_name: String,
    pub secret_value: String,
    pub fetched_at: DateTime<Utc>,
}

impl std::fmt::Debug for OutboundCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundCredential")
            .field("provider_name", &self.provider_name)
            .field("secret_value", &mask_secret(&self.secret_value))
            .field("fetched_at", &self.fetched_at)
            .finish()
    }
}

/// Lazily resolved, process-lifetime credential.
pub struct CredentialCache {
    broker: Arc<dyn CredentialBroker>,
    fetch_timeout: Duration,
    slot: Mutex<Option<Arc<OutboundCredential>>>,
}

impl CredentialCache {
    pub fn new(broker: Arc<dyn CredentialBroker>, fetch_timeout: Duration) -> Self {
        Self {
            broker,
            fetch_timeout,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached credential, fetching it from the broker on first use.
    pub async fn resolve(&self, provider_name: &str) -> Result<Arc<OutboundCredential>, BrokerError> {
        let mut slot = self.slot.lock().await;

        if let Some(credential) = slot.as_ref() {
            if credential.provider_name == provider_name {
                return Ok(Arc::clone(credential));
            }
            warn!(
                cached = %credential.provider_name,
                requested = %provider_name,
                "Replacing credential for a different provider"
            );
        }

        info!(provider = %provider_name, "Fetching outbound credential from broker");
        let fetched = tokio::time::timeout(
            self.fetch_timeout,
            self.broker.fetch_credential(provider_name),
        )
        .await
        .map_err(|_| BrokerError::Timeout(self.fetch_timeout.as_secs()))?;

        let secret_value = match fetched {
            Ok(secret) => secret,
            Err(e) => {
                warn!(provider = %provider_name, error = %e, "Credential fetch failed");
                return Err(e);
            }
        };

        let credential = Arc::new(OutboundCredential {
            provider_name: provider_name.to_string(),
            secret_value,
            fetched_at: Utc::now(),
        });
        info!(
            provider = %provider_name,
            secret = %mask_secret(&credential.secret_value),
            "Outbound credential resolved"
        );

        *slot = Some(Arc::clone(&credential));
        Ok(credential)
    }

    /// The cached credential, if resolved. Never triggers a fetch.
    pub async fn current(&self) -> Option<Arc<OutboundCredential>> {
        let slot = self.slot.lock().await;
        debug!(resolved = slot.is_some(), "Credential cache peek");
        slot.clone()
    }

    pub async fn is_resolved(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Broker that counts calls, optionally sleeps, and fails the first
    /// `failures` calls.
    struct CountingBroker {
        calls: AtomicUsize,
        delay: Duration,
        failures: usize,
    }

    impl CountingBroker {
        fn new(delay: Duration, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                failures,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialBroker for CountingBroker {
        async fn fetch_credential(&self, provider_name: &str) -> Result<String, BrokerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if n < self.failures {
                return Err(BrokerError::Unavailable("network unavailable".to_string()));
            }
            Ok(format!("sk-{provider_name}-{n}"))
        }
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_fetch_once() {
        let broker = CountingBroker::new(Duration::from_millis(50), 0);
        let cache = Arc::new(CredentialCache::new(broker.clone(), Duration::from_secs(5)));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.resolve("azure-openai-key").await })
            })
            .collect();

        let mut secrets = Vec::new();
        for handle in handles {
            secrets.push(handle.await.unwrap().unwrap().secret_value.clone());
        }

        assert_eq!(broker.calls(), 1);
        assert!(secrets.iter().all(|s| s == "sk-azure-openai-key-0"));
    }

    #[tokio::test]
    async fn test_resolved_never_refetches() {
        let broker = CountingBroker::new(Duration::ZERO, 0);
        let cache = CredentialCache::new(broker.clone(), Duration::from_secs(5));

        assert!(!cache.is_resolved().await);
        for _ in 0..100 {
            cache.resolve("azure-openai-key").await.unwrap();
        }
        assert!(cache.is_resolved().await);
        assert_eq!(broker.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_unresolved_and_retries() {
        let broker = CountingBroker::new(Duration::ZERO, 1);
        let cache = CredentialCache::new(broker.clone(), Duration::from_secs(5));

        let err = cache.resolve("azure-openai-key").await.unwrap_err();
        assert!(err.to_string().contains("network unavailable"));
        assert!(cache.current().await.is_none());

        let credential = cache.resolve("azure-openai-key").await.unwrap();
        assert_eq!(credential.secret_value, "sk-azure-openai-key-1");
        assert_eq!(broker.calls(), 2);
    }

    #[tokio::test]
    async fn test_timeout_releases_lock() {
        let broker = CountingBroker::new(Duration::from_millis(200), 0);
        let cache = CredentialCache::new(broker.clone(), Duration::from_millis(20));

        let err = cache.resolve("azure-openai-key").await.unwrap_err();
        assert!(matches!(err, BrokerError::Timeout(_)));
        assert!(!cache.is_resolved().await);
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_poison_cache() {
        let broker = CountingBroker::new(Duration::from_millis(100), 0);
        let cache = Arc::new(CredentialCache::new(broker.clone(), Duration::from_secs(5)));

        let first = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.resolve("azure-openai-key").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());

        let credential = cache.resolve("azure-openai-key").await.unwrap();
        assert_eq!(credential.secret_value, "sk-azure-openai-key-1");
        assert_eq!(broker.calls(), 2);
    }

    #[test]
    fn test_debug_masks_secret() {
        let credential = OutboundCredential {
            provider_name: "azure-openai-key".to_string(),
            secret_value: "sk-abc123456789".to_string(),
            fetched_at: Utc::now(),
        };
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("abc123456789"));
        assert!(rendered.contains("sk-a..."));
    }
}
