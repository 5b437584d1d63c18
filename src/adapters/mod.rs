//! Adapters module — ways into and out of the entrypoint.
//!
//! # Supported Channels
//!
//! - **HTTP** — `POST /invocations` behind bearer-token verification
//! - **CLI** — client that sends prompts to a running HTTP entrypoint

pub mod cli;
pub mod http;

pub use cli::InvokeClient;
pub use http::{router, HttpChannel};

/// Channel trait for serving adapters.
///
/// All channel implementations must be [`Send`] + [`Sync`] for async compatibility.
pub trait Channel: Send + Sync {
    /// Channel name (e.g., "http").
    fn name(&self) -> &str;

    /// Start serving. Resolves once the channel has stopped.
    fn start(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send;

    /// Ask a running channel to stop.
    fn stop(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send;
}
