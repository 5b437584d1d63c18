//! authbridge - prompt-answering agent entrypoint
//!
//! This library verifies inbound bearer tokens against an OIDC identity
//! provider, resolves the model provider's API key from a credential broker,
//! and answers prompts with a tool-calling agent.

pub mod agent;
pub mod tools;
pub mod adapters;
pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod outbound;

pub use error::{Error, ErrorKind, Result};
