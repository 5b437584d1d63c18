//! CLI adapter — sends prompts to a running invocation entrypoint.
//!
//! Single-message and interactive modes, both authenticated with a bearer
//! token obtained by `authbridge token`.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::error::Error;
use crate::handler::InvocationRequest;
use crate::Result;

/// HTTP client for `POST /invocations`.
pub struct InvokeClient {
    url: String,
    bearer_token: String,
    client: Client,
}

impl InvokeClient {
    pub fn new(base_url: &str, bearer_token: impl Into<String>) -> Result<Self> {
        let base = url::Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid entrypoint URL: {e}")))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            url: format!("{}/invocations", base.as_str().trim_end_matches('/')),
            bearer_token: bearer_token.into(),
            client,
        })
    }

    /// Send one prompt and return the response text.
    pub async fn invoke(&self, prompt: Option<&str>) -> Result<String> {
        let payload = InvocationRequest {
            prompt: prompt.map(String::from),
        };
        debug!(url = %self.url, "Sending invocation");

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.bearer_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        match status {
            s if s.is_success() => Ok(body),
            StatusCode::UNAUTHORIZED => Err(Error::Auth(format!(
                "Entrypoint rejected the bearer token: {body}"
            ))),
            s => Err(Error::Auth(format!("Entrypoint error ({s}): {body}"))),
        }
    }

    /// Run interactive REPL loop.
    pub async fn run_interactive(&self) -> Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("\n> ");
            stdout.flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                // EOF
                break;
            }

            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            if matches!(input.to_lowercase().as_str(), "exit" | "quit" | "q") {
                println!("Goodbye! 👋");
                break;
            }

            match self.invoke(Some(input)).await {
                Ok(text) => println!("\n{text}"),
                Err(e) => eprintln!("\nError: {e}"),
            }
        }

        Ok(())
    }
}
