//! Configuration management
//!
//! Configuration is read once at startup: built-in defaults, then an optional
//! JSON file, then environment variables. The result is immutable for the
//! life of the process.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::Result;
use crate::error::Error;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listen address for the invocation entrypoint
    #[serde(default)]
    pub server: ServerConfig,

    /// Inbound trust parameters (identity provider + allowed clients)
    #[serde(default)]
    pub inbound: TrustConfig,

    /// Outbound credential broker
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Downstream model provider
    #[serde(default)]
    pub model: ModelConfig,

    /// Agent behaviour
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Trust boundary for inbound bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// OIDC discovery document URL of the identity provider
    #[serde(default)]
    pub discovery_url: String,

    /// Client identifiers whose tokens are accepted
    #[serde(default)]
    pub allowed_clients: Vec<String>,

    /// Refuse plain-HTTP discovery and JWKS URLs
    #[serde(default = "default_true")]
    pub require_https: bool,

    /// Clock skew tolerance for `exp`/`nbf`
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,

    /// How long a fetched JWKS is trusted before refetching
    #[serde(default = "default_jwks_ttl_secs")]
    pub jwks_ttl_secs: u64,

    /// Minimum gap between JWKS refetches triggered by an unknown `kid`
    #[serde(default = "default_refresh_cooldown_secs")]
    pub refresh_cooldown_secs: u64,

    /// Accepted JWS algorithms
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<String>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            discovery_url: String::new(),
            allowed_clients: Vec::new(),
            require_https: true,
            leeway_secs: default_leeway_secs(),
            jwks_ttl_secs: default_jwks_ttl_secs(),
            refresh_cooldown_secs: default_refresh_cooldown_secs(),
            algorithms: default_algorithms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Base URL of the credential broker
    #[serde(default)]
    pub endpoint: String,

    /// Workload identity token presented to the broker, if it wants one
    #[serde(default)]
    pub workload_token: Option<String>,

    /// Name of the secret to fetch
    #[serde(default = "default_provider_name")]
    pub provider_name: String,

    #[serde(default = "default_broker_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            workload_token: None,
            provider_name: default_provider_name(),
            timeout_secs: default_broker_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Azure OpenAI resource endpoint, e.g. `https://foo.openai.azure.com`
    #[serde(default)]
    pub api_base: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_deployment")]
    pub deployment: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_version: default_api_version(),
            deployment: default_deployment(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_inference_timeout_secs(),
        }
    }
}

impl ModelConfig {
    /// Model identifier in `provider/deployment` form.
    pub fn model_identifier(&self) -> String {
        format!("azure/{}", self.deployment)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Prompt used when a request carries none
    #[serde(default = "default_greeting")]
    pub default_prompt: String,

    /// Maximum tool iterations
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            default_prompt: default_greeting(),
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_leeway_secs() -> u64 {
    60
}

fn default_jwks_ttl_secs() -> u64 {
    3600
}

fn default_refresh_cooldown_secs() -> u64 {
    30
}

fn default_algorithms() -> Vec<String> {
    vec!["RS256".to_string()]
}

fn default_provider_name() -> String {
    "azure-openai-key".to_string()
}

fn default_broker_timeout_secs() -> u64 {
    30
}

fn default_api_version() -> String {
    "2024-02-01".to_string()
}

fn default_deployment() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

fn default_inference_timeout_secs() -> u64 {
    120
}

fn default_system_prompt() -> String {
    "あなたは親切なアシスタントです。計算と天気の情報を提供できます。".to_string()
}

fn default_greeting() -> String {
    "こんにちは".to_string()
}

fn default_max_iterations() -> usize {
    10
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".authbridge")
}

/// Get the default config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration: defaults, then the JSON file (if any), then the
/// process environment.
///
/// An explicitly given path must exist; the default path is optional.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => {
            let default_path = config_path();
            if default_path.exists() {
                read_file(&default_path)?
            } else {
                Config::default()
            }
        }
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}

fn read_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(Error::Config(format!("Config not found at {:?}", path)));
    }

    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}

impl Config {
    /// Overlay environment variables on top of the current values.
    ///
    /// `lookup` abstracts the environment so tests don't touch process state.
    /// A value that is set but unparsable is a configuration error.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DISCOVERY_URL") {
            self.inbound.discovery_url = v;
        }
        if let Some(v) = get("ALLOWED_CLIENTS") {
            self.inbound.allowed_clients = split_list(&v);
        } else if let Some(v) = get("CLIENT_ID") {
            self.inbound.allowed_clients = vec![v.trim().to_string()];
        }
        if let Some(v) = get("JWT_ALGORITHMS") {
            self.inbound.algorithms = split_list(&v);
        }

        if let Some(v) = get("CREDENTIAL_BROKER_URL") {
            self.broker.endpoint = v;
        }
        if let Some(v) = get("WORKLOAD_ACCESS_TOKEN") {
            self.broker.workload_token = Some(v);
        }
        if let Some(v) = get("CREDENTIAL_PROVIDER_NAME") {
            self.broker.provider_name = v;
        }

        if let Some(v) = get("AZURE_API_BASE") {
            self.model.api_base = v;
        }
        if let Some(v) = get("AZURE_API_VERSION") {
            self.model.api_version = v;
        }
        if let Some(v) = get("AZURE_DEPLOYMENT_NAME") {
            self.model.deployment = v;
        }

        if let Some(v) = get("AUTHBRIDGE_HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("AUTHBRIDGE_PORT") {
            self.server.port = v.trim().parse().map_err(|_| {
                Error::Config(format!("AUTHBRIDGE_PORT is not a valid port: {v}"))
            })?;
        }
        Ok(())
    }

    /// Check that everything needed to serve requests is present.
    pub fn validate(&self) -> Result<()> {
        if self.inbound.discovery_url.is_empty() {
            return Err(Error::Config("DISCOVERY_URL is not set".to_string()));
        }
        url::Url::parse(&self.inbound.discovery_url)
            .map_err(|e| Error::Config(format!("Invalid discovery URL: {}", e)))?;

        if self.inbound.allowed_clients.is_empty() {
            return Err(Error::Config(
                "At least one allowed client ID is required".to_string(),
            ));
        }
        if self.inbound.algorithms.is_empty() {
            return Err(Error::Config("No JWT algorithms configured".to_string()));
        }
        if self.broker.endpoint.is_empty() {
            return Err(Error::Config("CREDENTIAL_BROKER_URL is not set".to_string()));
        }
        if self.model.api_base.is_empty() {
            return Err(Error::Config("AZURE_API_BASE is not set".to_string()));
        }
        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.deployment, "gpt-4o-mini");
        assert_eq!(config.model.max_tokens, 4096);
        assert_eq!(config.broker.provider_name, "azure-openai-key");
        assert_eq!(config.agent.default_prompt, "こんにちは");
        assert_eq!(config.model.model_identifier(), "azure/gpt-4o-mini");
        assert!(config.inbound.require_https);
    }

    #[test]
    fn test_env_overlay() {
        let vars = env(&[
            ("DISCOVERY_URL", "https://idp.example.com/.well-known/openid-configuration"),
            ("ALLOWED_CLIENTS", "client-A, client-B,"),
            ("AZURE_API_BASE", "https://foo.openai.azure.com"),
            ("AZURE_DEPLOYMENT_NAME", "gpt-4o"),
            ("CREDENTIAL_BROKER_URL", "https://broker.example.com"),
            ("AUTHBRIDGE_PORT", "9000"),
        ]);

        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.inbound.allowed_clients, vec!["client-A", "client-B"]);
        assert_eq!(config.model.deployment, "gpt-4o");
        assert_eq!(config.server.port, 9000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        for bad in ["80a", "70000", "-1"] {
            let vars = env(&[("AUTHBRIDGE_PORT", bad)]);
            let mut config = Config::default();
            let err = config.apply_env(|k| vars.get(k).cloned()).unwrap_err();
            assert!(matches!(err, Error::Config(ref m) if m.contains("AUTHBRIDGE_PORT")), "{bad}: {err}");
        }
    }

    #[test]
    fn test_client_id_fallback() {
        let vars = env(&[("CLIENT_ID", "abc123")]);
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.inbound.allowed_clients, vec!["abc123"]);
    }

    #[test]
    fn test_validate_missing_fields() {
        let config = Config::default();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("DISCOVERY_URL"));

        let mut config = Config::default();
        config.inbound.discovery_url = "https://idp.example.com".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("allowed client"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"model": {"deployment": "gpt-4.1-mini", "temperature": 0.2}}"#,
        )
        .unwrap();

        let config = read_file(&path).unwrap();
        assert_eq!(config.model.deployment, "gpt-4.1-mini");
        assert_eq!(config.model.max_tokens, 4096);
        assert!((config.model.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = load(Some(Path::new("/nonexistent/authbridge.json")));
        assert!(result.is_err());
    }
}
