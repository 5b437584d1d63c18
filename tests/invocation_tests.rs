//! End-to-end invocation tests
//!
//! Spins up a mock identity provider, credential broker and Azure OpenAI
//! endpoint on ephemeral ports, then drives the real router:
//! - Bearer token verification against discovered keys
//! - Single broker fetch across concurrent first requests
//! - Tool-calling inference with the broker-supplied API key

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use authbridge::adapters::router;
use authbridge::config::Config;
use authbridge::handler::AppContext;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

const ISSUER: &str = "https://cognito-idp.us-west-2.amazonaws.com/us-west-2_e2e";
const SIGNING_SECRET: &[u8] = b"e2e-identity-provider-secret";

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Discovery document plus a one-key JWKS.
async fn spawn_identity_provider() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let jwks_uri = format!("http://{addr}/jwks");

    let app = Router::new()
        .route(
            "/.well-known/openid-configuration",
            get(move || async move { Json(json!({"issuer": ISSUER, "jwks_uri": jwks_uri})) }),
        )
        .route(
            "/jwks",
            get(|| async {
                Json(json!({
                    "keys": [{"kty": "oct", "kid": "e2e", "k": URL_SAFE_NO_PAD.encode(SIGNING_SECRET)}]
                }))
            }),
        );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[derive(Clone, Default)]
struct BrokerState {
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Value>>>,
}

async fn spawn_broker(state: BrokerState, delay: Duration) -> SocketAddr {
    let app = Router::new()
        .route(
            "/identities/api-key",
            post(move |State(state): State<BrokerState>, Json(body): Json<Value>| async move {
                state.calls.fetch_add(1, Ordering::SeqCst);
                state.requests.lock().unwrap().push(body);
                tokio::time::sleep(delay).await;
                Json(json!({"apiKey": "sk-abc123"}))
            }),
        )
        .with_state(state);
    spawn(app).await
}

#[derive(Clone, Default)]
struct ModelState {
    api_keys: Arc<Mutex<Vec<String>>>,
    paths: Arc<Mutex<Vec<String>>>,
}

/// Asks for the calculator first, then reports the tool result.
async fn spawn_model(state: ModelState) -> SocketAddr {
    async fn chat(
        State(state): State<ModelState>,
        uri: axum::http::Uri,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let key = headers
            .get("api-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        state.api_keys.lock().unwrap().push(key);
        state.paths.lock().unwrap().push(uri.to_string());

        let messages = body["messages"].as_array().cloned().unwrap_or_default();
        let last = messages.last().cloned().unwrap_or(Value::Null);

        if last["role"] == "tool" {
            let result = last["content"].as_str().unwrap_or_default();
            return Json(json!({
                "choices": [{
                    "message": {"role": "assistant", "content": format!("計算結果は{result}です")},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 30, "completion_tokens": 8, "total_tokens": 38}
            }));
        }

        let prompt = last["content"].as_str().unwrap_or_default();
        if prompt.contains("計算") {
            return Json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_calc",
                            "type": "function",
                            "function": {"name": "calculator", "arguments": "{\"expression\":\"2+2\"}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            }));
        }

        Json(json!({
            "choices": [{"message": {"role": "assistant", "content": format!("echo: {prompt}")}, "finish_reason": "stop"}]
        }))
    }

    let app = Router::new()
        .route("/openai/deployments/{deployment}/chat/completions", post(chat))
        .with_state(state);
    spawn(app).await
}

struct Harness {
    app: Router,
    broker: BrokerState,
    model: ModelState,
}

async fn harness(broker_delay: Duration) -> Harness {
    let idp = spawn_identity_provider().await;
    let broker = BrokerState::default();
    let broker_addr = spawn_broker(broker.clone(), broker_delay).await;
    let model = ModelState::default();
    let model_addr = spawn_model(model.clone()).await;

    let mut config = Config::default();
    config.inbound.discovery_url = format!("http://{idp}/.well-known/openid-configuration");
    config.inbound.require_https = false;
    config.inbound.allowed_clients = vec!["client-A".to_string()];
    config.inbound.algorithms = vec!["HS256".to_string()];
    config.broker.endpoint = format!("http://{broker_addr}");
    config.broker.workload_token = Some("workload-token".to_string());
    config.model.api_base = format!("http://{model_addr}");

    let ctx = AppContext::from_config(config).unwrap();
    Harness {
        app: router(Arc::new(ctx)),
        broker,
        model,
    }
}

fn token_for(client_id: &str) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("e2e".to_string());
    let claims = json!({
        "iss": ISSUER,
        "sub": "user-1",
        "client_id": client_id,
        "token_use": "access",
        "exp": chrono::Utc::now().timestamp() + 600,
    });
    jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(SIGNING_SECRET)).unwrap()
}

async fn invoke(app: &Router, token: &str, body: Value) -> (StatusCode, String) {
    let request = Request::post("/invocations")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// The calculator scenario: broker key in the header, tool result in the answer.
#[tokio::test]
async fn test_calculator_prompt_answers_four() {
    let h = harness(Duration::ZERO).await;

    let (status, text) = invoke(&h.app, &token_for("client-A"), json!({"prompt": "2+2を計算して"})).await;

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains('4'), "unexpected answer: {text}");
    assert_eq!(*h.model.api_keys.lock().unwrap(), vec!["sk-abc123", "sk-abc123"]);
    assert!(h.model.paths.lock().unwrap()[0]
        .starts_with("/openai/deployments/gpt-4o-mini/chat/completions?api-version=2024-02-01"));

    let requests = h.broker.requests.lock().unwrap();
    assert_eq!(requests[0]["resourceCredentialProviderName"], "azure-openai-key");
    assert_eq!(requests[0]["workloadIdentityToken"], "workload-token");
}

/// A token for a client outside the allow-list never reaches the broker.
#[tokio::test]
async fn test_disallowed_client_rejected_without_credential_fetch() {
    let h = harness(Duration::ZERO).await;

    let request = Request::post("/invocations")
        .header(header::AUTHORIZATION, format!("Bearer {}", token_for("client-B")))
        .body(Body::from(r#"{"prompt":"hi"}"#))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    assert_eq!(h.broker.calls.load(Ordering::SeqCst), 0);
    assert!(h.model.api_keys.lock().unwrap().is_empty());
}

/// Concurrent first requests share one broker fetch.
#[tokio::test]
async fn test_concurrent_first_requests_fetch_once() {
    let h = harness(Duration::from_millis(200)).await;
    let token = token_for("client-A");

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let app = h.app.clone();
            let token = token.clone();
            tokio::spawn(async move { invoke(&app, &token, json!({"prompt": format!("hello {i}")})).await })
        })
        .collect();

    for task in tasks {
        let (status, text) = task.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(text.starts_with("echo: hello"), "unexpected answer: {text}");
    }

    assert_eq!(h.broker.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.model.api_keys.lock().unwrap().len(), 8);

    let (_, _) = invoke(&h.app, &token, json!({"prompt": "again"})).await;
    assert_eq!(h.broker.calls.load(Ordering::SeqCst), 1);
}

/// A request without a prompt gets the default greeting.
#[tokio::test]
async fn test_missing_prompt_uses_greeting() {
    let h = harness(Duration::ZERO).await;

    let (status, text) = invoke(&h.app, &token_for("client-A"), json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "echo: こんにちは");
}

#[tokio::test]
async fn test_ping_needs_no_token() {
    let h = harness(Duration::ZERO).await;

    let response = h
        .app
        .clone()
        .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.broker.calls.load(Ordering::SeqCst), 0);
}
