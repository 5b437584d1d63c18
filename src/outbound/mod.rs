//! Outbound credentials — fetching and caching the model provider's secret.

mod broker;
mod cache;

pub use broker::{CredentialBroker, HttpCredentialBroker};
pub use cache::{CredentialCache, OutboundCredential};

use thiserror::Error;

/// Ways a credential fetch can fail.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("provider unknown: {0}")]
    ProviderUnknown(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("network unavailable: {0}")]
    Unavailable(String),

    #[error("broker did not answer within {0}s")]
    Timeout(u64),

    #[error("invalid broker response: {0}")]
    InvalidResponse(String),
}

/// Render a secret for logs: the first four characters and an ellipsis.
pub fn mask_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("sk-abc123"), "sk-a...");
        assert_eq!(mask_secret("ab"), "ab...");
        assert_eq!(mask_secret("鍵鍵鍵鍵鍵"), "鍵鍵鍵鍵...");
    }
}
