//! Password-flow login against a Cognito user pool.
//!
//! Used by the `token` command to obtain a bearer token for calling the
//! entrypoint. Only the unauthenticated `InitiateAuth` call with the
//! `USER_PASSWORD_AUTH` flow is needed, so this speaks the JSON protocol
//! directly rather than pulling in an SDK.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;
use crate::error::Error;
use super::token_file::TokenGrant;

const INITIATE_AUTH_TARGET: &str = "AWSCognitoIdentityProviderService.InitiateAuth";
const AMZ_JSON: &str = "application/x-amz-json-1.1";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthRequest<'a> {
    auth_flow: &'a str,
    client_id: &'a str,
    auth_parameters: AuthParameters<'a>,
}

#[derive(Debug, Serialize)]
struct AuthParameters<'a> {
    #[serde(rename = "USERNAME")]
    username: &'a str,
    #[serde(rename = "PASSWORD")]
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    #[serde(default)]
    authentication_result: Option<AuthenticationResult>,
    #[serde(default)]
    challenge_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

/// Minimal Cognito Identity Provider client.
#[derive(Clone)]
pub struct CognitoClient {
    endpoint: String,
    http: Client,
}

impl CognitoClient {
    /// Client for the regional public endpoint.
    pub fn new(region: &str) -> Self {
        Self::with_endpoint(format!("https://cognito-idp.{region}.amazonaws.com/"))
    }

    /// Client for an explicit endpoint.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: Client::new(),
        }
    }

    /// Authenticate a user and return the issued tokens.
    pub async fn password_login(
        &self,
        client_id: &str,
        username: &str,
        password: &str,
    ) -> Result<TokenGrant> {
        let request = InitiateAuthRequest {
            auth_flow: "USER_PASSWORD_AUTH",
            client_id,
            auth_parameters: AuthParameters { username, password },
        };

        debug!(client_id = %client_id, "Initiating password auth");
        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", AMZ_JSON)
            .header("X-Amz-Target", INITIATE_AUTH_TARGET)
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let detail = serde_json::from_slice::<ErrorBody>(&body)
                .map(|e| format!("{}: {}", e.kind, e.message))
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            return Err(Error::Auth(format!("login failed ({status}): {detail}")));
        }

        let parsed: InitiateAuthResponse = serde_json::from_slice(&body)?;
        let result = parsed.authentication_result.ok_or_else(|| {
            Error::Auth(format!(
                "login requires challenge {}",
                parsed.challenge_name.as_deref().unwrap_or("unknown")
            ))
        })?;

        Ok(TokenGrant::new(
            result.access_token,
            result.id_token,
            result.refresh_token,
            result.expires_in,
        ))
    }
}
