//! Credential broker client.
//!
//! The broker stores named secrets and hands them out on request. The
//! service itself never holds the model provider's API key statically; it
//! asks the broker with `fetch_credential(provider_name)`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BrokerConfig;
use super::BrokerError;

/// Source of named secrets.
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    /// Return the secret registered under `provider_name`.
    async fn fetch_credential(&self, provider_name: &str) -> Result<String, BrokerError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyRequest<'a> {
    resource_credential_provider_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    workload_identity_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyResponse {
    api_key: String,
}

/// Broker reached over HTTP: `POST {endpoint}/identities/api-key`.
#[derive(Clone)]
pub struct HttpCredentialBroker {
    endpoint: String,
    workload_token: Option<String>,
    http: Client,
}

impl HttpCredentialBroker {
    pub fn new(config: &BrokerConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            workload_token: config.workload_token.clone(),
            http,
        }
    }

    fn url(&self) -> String {
        format!("{}/identities/api-key", self.endpoint)
    }
}

#[async_trait]
impl CredentialBroker for HttpCredentialBroker {
    async fn fetch_credential(&self, provider_name: &str) -> Result<String, BrokerError> {
        let request = ApiKeyRequest {
            resource_credential_provider_name: provider_name,
            workload_identity_token: self.workload_token.as_deref(),
        };

        debug!(provider = %provider_name, url = %self.url(), "Requesting credential from broker");
        let response = self
            .http
            .post(self.url())
            .json(&request)
            .send()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let body: ApiKeyResponse = response
                    .json()
                    .await
                    .map_err(|e| BrokerError::InvalidResponse(e.to_string()))?;
                if body.api_key.is_empty() {
                    return Err(BrokerError::InvalidResponse("empty apiKey".to_string()));
                }
                Ok(body.api_key)
            }
            StatusCode::NOT_FOUND => Err(BrokerError::ProviderUnknown(provider_name.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let detail = response.text().await.unwrap_or_default();
                Err(BrokerError::AccessDenied(format!("{provider_name}: {detail}")))
            }
            status => {
                let detail = response.text().await.unwrap_or_default();
                Err(BrokerError::Unavailable(format!("broker returned {status}: {detail}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn spawn_broker() -> String {
        async fn api_key(Json(body): Json<Value>) -> (AxumStatus, Json<Value>) {
            match body["resourceCredentialProviderName"].as_str() {
                Some("azure-openai-key") if body["workloadIdentityToken"] == "wl-token" => {
                    (AxumStatus::OK, Json(json!({"apiKey": "sk-abc123"})))
                }
                Some("azure-openai-key") => {
                    (AxumStatus::FORBIDDEN, Json(json!({"message": "denied"})))
                }
                _ => (AxumStatus::NOT_FOUND, Json(json!({"message": "no such provider"}))),
            }
        }

        let app = Router::new().route("/identities/api-key", post(api_key));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn broker(endpoint: &str, token: Option<&str>) -> HttpCredentialBroker {
        HttpCredentialBroker::new(&BrokerConfig {
            endpoint: endpoint.to_string(),
            workload_token: token.map(String::from),
            ..BrokerConfig::default()
        })
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let endpoint = spawn_broker().await;
        let secret = broker(&endpoint, Some("wl-token"))
            .fetch_credential("azure-openai-key")
            .await
            .unwrap();
        assert_eq!(secret, "sk-abc123");
    }

    #[tokio::test]
    async fn test_fetch_failure_kinds() {
        let endpoint = spawn_broker().await;

        let err = broker(&endpoint, Some("wl-token"))
            .fetch_credential("other-key")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ProviderUnknown(ref name) if name == "other-key"));

        let err = broker(&endpoint, None)
            .fetch_credential("azure-openai-key")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::AccessDenied(_)));

        let err = broker("http://127.0.0.1:1", None)
            .fetch_credential("azure-openai-key")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));
    }
}
