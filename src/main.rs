//! authbridge CLI entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use authbridge::adapters::{Channel, HttpChannel, InvokeClient};
use authbridge::auth::{load_token_env, save_token_env, token_env_path, CognitoClient};
use authbridge::handler::AppContext;
use authbridge::outbound::mask_secret;

#[derive(Parser)]
#[command(name = "authbridge")]
#[command(about = "🔐 authbridge - agent entrypoint with inbound JWT and outbound broker credentials")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.authbridge/config.json when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the invocation entrypoint
    Serve {
        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Obtain a bearer token with the password flow and write it to a file
    Token {
        /// App client ID (falls back to CLIENT_ID)
        #[arg(long)]
        client_id: Option<String>,

        /// Username (falls back to USERNAME)
        #[arg(short, long)]
        username: Option<String>,

        /// Password (falls back to PASSWORD)
        #[arg(long)]
        password: Option<String>,

        /// Region of the user pool (falls back to REGION, then us-west-2)
        #[arg(short, long)]
        region: Option<String>,

        /// Where to write `export BEARER_TOKEN=...`
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Send a prompt to a running entrypoint
    Invoke {
        /// Prompt to send; interactive mode when omitted
        #[arg(short, long)]
        message: Option<String>,

        /// Entrypoint base URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        /// Token file written by `authbridge token`
        #[arg(long)]
        token_file: Option<PathBuf>,
    },

    /// Show the effective configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            let mut config = authbridge::config::load(cli.config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            run_serve(config).await?;
        }

        Commands::Token {
            client_id,
            username,
            password,
            region,
            output,
        } => {
            let client_id = arg_or_env(client_id, "CLIENT_ID")?;
            let username = arg_or_env(username, "USERNAME")?;
            let password = arg_or_env(password, "PASSWORD")?;
            let region = region
                .or_else(|| std::env::var("REGION").ok())
                .unwrap_or_else(|| "us-west-2".to_string());
            let output = output.unwrap_or_else(token_env_path);

            let grant = CognitoClient::new(&region)
                .password_login(&client_id, &username, &password)
                .await?;
            save_token_env(&output, &grant)?;

            println!("✓ Bearer token written to {}", output.display());
            if let Some(expires_at) = grant.expires_at {
                println!("  Expires at {expires_at}");
            }
            if grant.is_expired() {
                println!("⚠️  The token expires within 5 minutes");
            }
            println!("\nUse it with: source {}", output.display());
        }

        Commands::Invoke {
            message,
            url,
            token_file,
        } => {
            let token = match std::env::var("BEARER_TOKEN").ok().filter(|t| !t.is_empty()) {
                Some(token) => token,
                None => {
                    let path = token_file.unwrap_or_else(token_env_path);
                    load_token_env(&path)?.with_context(|| {
                        format!(
                            "BEARER_TOKEN is not set and {} has no token (run 'authbridge token')",
                            path.display()
                        )
                    })?
                }
            };

            let client = InvokeClient::new(&url, token)?;
            match message {
                Some(msg) => println!("{}", client.invoke(Some(&msg)).await?),
                None => {
                    println!("🔐 Interactive mode (exit to quit)");
                    client.run_interactive().await?;
                }
            }
        }

        Commands::Status => {
            let config = authbridge::config::load(cli.config.as_deref())?;
            println!("🔐 authbridge Status\n");
            println!("Listen: {}:{}", config.server.host, config.server.port);
            println!("Discovery URL: {}", or_unset(&config.inbound.discovery_url));
            println!("Allowed clients: {}", config.inbound.allowed_clients.join(", "));
            println!("JWT algorithms: {}", config.inbound.algorithms.join(", "));
            println!("Broker: {}", or_unset(&config.broker.endpoint));
            println!("Credential provider: {}", config.broker.provider_name);
            println!(
                "Workload token: {}",
                config
                    .broker
                    .workload_token
                    .as_deref()
                    .map(mask_secret)
                    .unwrap_or_else(|| "not set".to_string())
            );
            println!("Model: {}", config.model.model_identifier());
            println!("Model endpoint: {}", or_unset(&config.model.api_base));

            match config.validate() {
                Ok(()) => println!("\n✓ Configuration is complete"),
                Err(e) => println!("\n⚠️  {e}"),
            }
        }
    }

    Ok(())
}

async fn run_serve(config: authbridge::config::Config) -> Result<()> {
    let ctx = Arc::new(AppContext::from_config(config)?);
    let channel = HttpChannel::new(ctx)?;

    println!("🔐 Starting authbridge on {}...", channel.addr());
    channel.start().await?;
    Ok(())
}

fn arg_or_env(value: Option<String>, var: &str) -> Result<String> {
    value
        .or_else(|| std::env::var(var).ok())
        .filter(|v| !v.is_empty())
        .with_context(|| format!("{var} is required (flag or environment variable)"))
}

fn or_unset(value: &str) -> &str {
    if value.is_empty() {
        "not set"
    } else {
        value
    }
}
