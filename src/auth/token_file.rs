//! Bearer token storage for the CLI
//!
//! Tokens are written as a sourceable shell snippet (`.token_env`) so the
//! same file works for `source .token_env && curl ...` and for the
//! `invoke` command.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::Result;

const TOKEN_VAR: &str = "BEARER_TOKEN";

/// Tokens issued by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    /// The access token presented as the bearer credential
    pub access_token: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// When the access token expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenGrant {
    /// Create a grant from a token response
    pub fn new(
        access_token: String,
        id_token: Option<String>,
        refresh_token: Option<String>,
        expires_in_secs: Option<i64>,
    ) -> Self {
        let expires_at = expires_in_secs.map(|secs| {
            Utc::now() + chrono::Duration::seconds(secs)
        });

        Self {
            access_token,
            id_token,
            refresh_token,
            expires_at,
        }
    }

    /// Check if the access token is expired or about to expire
    ///
    /// Returns true if the token expires within the next 5 minutes
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => {
                let buffer = chrono::Duration::minutes(5);
                Utc::now() + buffer >= expires
            }
            None => false,
        }
    }
}

/// Default token file location (current directory)
pub fn token_env_path() -> PathBuf {
    PathBuf::from(".token_env")
}

/// Write the access token as `export BEARER_TOKEN="..."`
pub fn save_token_env(path: &Path, grant: &TokenGrant) -> Result<()> {
    let content = format!("export {}=\"{}\"\n", TOKEN_VAR, grant.access_token);
    std::fs::write(path, content)?;

    // Set restrictive permissions on Unix
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }

    Ok(())
}

/// Read the token back from a file written by [`save_token_env`]
pub fn load_token_env(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)?;
    let prefix = format!("export {}=", TOKEN_VAR);
    let token = content
        .lines()
        .filter_map(|line| line.trim().strip_prefix(&prefix))
        .map(|value| value.trim().trim_matches('"').to_string())
        .find(|value| !value.is_empty());

    Ok(token)
}
