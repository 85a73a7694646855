//! Stealth Relay Client
//!
//! Local SOCKS5 proxy that sends every CONNECT through the relay over an
//! encrypted stream.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use stealth_relay::{
    config::{ClientConfig, Config},
    proxy::{RelayClient, Socks5Server},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Stealth Relay Client - local SOCKS5 proxy
#[derive(Parser, Debug)]
#[command(name = "stealth-client")]
#[command(about = "Stealth Relay Client - local SOCKS5 proxy over the relay")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Relay address (overrides config)
    #[arg(short, long)]
    server: Option<String>,

    /// Local SOCKS5 proxy address (overrides config)
    #[arg(long)]
    socks5: Option<String>,

    /// Shared secret (overrides config)
    #[arg(long)]
    password: Option<String>,

    /// Cipher method (overrides config)
    #[arg(short, long)]
    method: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log_level))
        .init();

    let mut config = if std::path::Path::new(&args.config).exists() {
        Config::load(&args.config).context("Failed to load configuration")?
    } else {
        Config::default()
    };

    let mut client_config = config.client.clone().unwrap_or_else(ClientConfig::default);
    if let Some(server) = args.server {
        client_config.server = server;
    }
    if let Some(socks5) = args.socks5 {
        client_config.socks5_listen = socks5;
    }
    if let Some(password) = args.password {
        config.relay.password = password;
    }
    if let Some(method) = args.method {
        config.relay.method = method;
    }

    if config.relay.password.is_empty() {
        return Err(anyhow!("A shared secret is required (relay.password or --password)"));
    }
    let cipher = config.relay.cipher().context("Failed to set up cipher")?;

    let relay = RelayClient::new(client_config.server.clone(), cipher)
        .with_retry(config.obfuscation.retry.clone());

    let mut socks = Socks5Server::bind(&client_config.socks5_listen)
        .await
        .context("Failed to bind SOCKS5 listener")?;
    if let (Some(user), Some(pass)) = (client_config.username, client_config.password) {
        socks = socks.with_auth(user, pass);
    }

    info!(
        "Stealth Relay client v{} forwarding to {}",
        stealth_relay::VERSION,
        relay.server()
    );

    tokio::select! {
        result = socks.run(relay) => result.context("SOCKS5 proxy failed")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
    }

    Ok(())
}
