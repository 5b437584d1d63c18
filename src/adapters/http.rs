//! HTTP channel — the invocation entrypoint.
//!
//! Routes:
//! - `POST /invocations` (bearer token required)
//! - `GET /ping` (public)

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::auth::{bearer_token, VerifiedIdentity};
use crate::error::Error;
use crate::handler::{self, AppContext, InvocationRequest};
use crate::Result;

use super::Channel;

/// Build the router over a shared context.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let protected = Router::new()
        .route("/invocations", post(invocations))
        .route_layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware));

    Router::new()
        .route("/ping", get(ping))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Reject requests whose bearer token does not pass inbound verification.
///
/// Runs before any core state is touched.
pub async fn auth_middleware(
    State(ctx): State<Arc<AppContext>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let verified = match bearer_token(authorization.as_deref()) {
        Ok(token) => ctx.verifier.verify(token).await,
        Err(e) => Err(e),
    };

    match verified {
        Ok(identity) => {
            debug!(client = %identity.client_id, subject = %identity.subject, "Bearer token accepted");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %request.uri().path(), reason = %e, "Rejected inbound token");
            unauthorized_response(&Error::from(e).to_string())
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(json!({ "error": message })),
    )
        .into_response()
}

async fn invocations(
    State(ctx): State<Arc<AppContext>>,
    Extension(identity): Extension<VerifiedIdentity>,
    body: Bytes,
) -> Response {
    let request: InvocationRequest = if body.iter().all(u8::is_ascii_whitespace) {
        InvocationRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, format!("invalid payload: {e}")).into_response();
            }
        }
    };

    let request_id = Uuid::new_v4();
    let response = handler::handle(&ctx, Some(&identity), request)
        .instrument(info_span!("invocation", %request_id, client = %identity.client_id))
        .await;

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        response.into_text(),
    )
        .into_response()
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "status": "Healthy" }))
}

/// Serves [`router`] on a TCP listener until stopped or signalled.
pub struct HttpChannel {
    addr: SocketAddr,
    ctx: Arc<AppContext>,
    shutdown: Arc<Notify>,
}

impl HttpChannel {
    pub fn new(ctx: Arc<AppContext>) -> Result<Self> {
        let addr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid listen address: {e}")))?;
        Ok(Self {
            addr,
            ctx,
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Channel for HttpChannel {
    fn name(&self) -> &str {
        "http"
    }

    async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Invocation entrypoint listening");

        let stop = Arc::clone(&self.shutdown);
        axum::serve(listener, router(self.ctx.clone()))
            .with_graceful_shutdown(async move {
                tokio::select! {
                    () = shutdown_signal() => {},
                    () = stop.notified() => {},
                }
            })
            .await?;

        info!("Invocation entrypoint stopped");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.notify_one();
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ClientFactory, LlmClient};
    use crate::auth::{InboundVerifier, KeyStore};
    use crate::config::{Config, ModelConfig};
    use crate::outbound::{BrokerError, CredentialBroker};
    use async_trait::async_trait;
    use axum::http::Request as HttpRequest;
    use jsonwebtoken::jwk::JwkSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    struct CountingBroker(AtomicUsize);

    #[async_trait]
    impl CredentialBroker for CountingBroker {
        async fn fetch_credential(&self, _provider: &str) -> std::result::Result<String, BrokerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("sk-abc123".to_string())
        }
    }

    struct NoFactory;

    impl ClientFactory for NoFactory {
        fn create(&self, _config: &ModelConfig, _secret: &str) -> Result<Arc<dyn LlmClient>> {
            Err(Error::SessionConstruction("not under test".to_string()))
        }
    }

    fn context() -> (Arc<AppContext>, Arc<CountingBroker>) {
        let config = Config::default();
        let verifier = InboundVerifier::with_key_store(
            &config.inbound,
            KeyStore::preloaded("https://issuer.test", JwkSet { keys: vec![] }),
        )
        .unwrap();
        let broker = Arc::new(CountingBroker(AtomicUsize::new(0)));
        let ctx = AppContext::new(config, verifier, broker.clone(), Arc::new(NoFactory));
        (Arc::new(ctx), broker)
    }

    fn app() -> (Router, Arc<CountingBroker>) {
        let (ctx, broker) = context();
        (router(ctx), broker)
    }

    #[tokio::test]
    async fn test_ping_is_public() {
        let (app, _) = app();
        let response = app
            .oneshot(HttpRequest::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "Healthy");
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected_before_broker() {
        let (app, broker) = app();
        let response = app
            .oneshot(
                HttpRequest::post("/invocations")
                    .body(Body::from(r#"{"prompt":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
        assert_eq!(broker.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_garbage_token_is_rejected() {
        let (app, broker) = app();
        let response = app
            .oneshot(
                HttpRequest::post("/invocations")
                    .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(broker.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_channel_address() {
        let (ctx, _) = context();
        let channel = HttpChannel::new(ctx).unwrap();
        assert_eq!(channel.name(), "http");
        assert_eq!(channel.addr().port(), 8080);
    }
}
