//! Stealth Relay Server
//!
//! Runs the encrypted TCP relay and, when configured:
//! - a UDP DNS forwarder with a deny list
//! - a DNSBL gate in front of every relay connection
//!
//! On Unix, `SIGUSR1` triggers emergency lockdown.

use anyhow::{Context, Result};
use base64::Engine;
use clap::Parser;
use stealth_relay::{
    config::{generate_example_config, Config, LogFormat, LoggingConfig},
    crypto::random_bytes,
    obfuscation::ObfuscationConfig,
    relay::RelayContext,
    server::{TcpRelayServer, UdpForwarder},
    transport::TcpTransport,
    Error, Lockdown,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Stealth Relay Server - encrypted, obfuscated TCP relay
#[derive(Parser, Debug)]
#[command(name = "stealth-server")]
#[command(about = "Stealth Relay Server - encrypted, traffic-obfuscated TCP relay")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Print a random shared secret and exit
    #[arg(long)]
    generate_password: bool,

    /// Write an example configuration to the config path and exit
    #[arg(long)]
    generate_config: bool,

    /// Listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Listen port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Shared secret (overrides config)
    #[arg(long)]
    password: Option<String>,

    /// Disable padding bursts and rejection delays
    #[arg(long)]
    no_obfuscation: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_password {
        return generate_password();
    }

    if args.generate_config {
        generate_example_config()
            .save(&args.config)
            .context("Failed to write example configuration")?;
        println!("Example configuration written to {}", args.config);
        return Ok(());
    }

    let mut config = if std::path::Path::new(&args.config).exists() {
        Config::load(&args.config).context("Failed to load configuration")?
    } else {
        Config::default()
    };

    init_logging(&config.logging, args.log_level.as_deref());

    if let Some(listen) = args.listen {
        config.relay.listen = listen;
    }
    if let Some(port) = args.port {
        config.relay.port = port;
    }
    if let Some(password) = args.password {
        config.relay.password = password;
    }
    if args.no_obfuscation {
        config.obfuscation = ObfuscationConfig::disabled();
    }

    config.validate().context("Invalid configuration")?;

    let lockdown = Lockdown::global();
    watch_lockdown_signal(lockdown.clone());

    let cipher = config.relay.cipher().context("Failed to set up cipher")?;
    let ctx = RelayContext::new(
        TcpTransport::new(config.relay.transport_config()),
        config.obfuscation.clone(),
        lockdown.clone(),
    );

    let mut relay = TcpRelayServer::bind(
        config.relay.listen_addr()?,
        cipher,
        ctx,
        config.relay.per_ip_limit,
    )
    .await
    .context("Failed to bind relay listener")?;

    if let Some(checker) = config.blacklist.checker() {
        info!("DNSBL gate enabled with {} providers", checker.providers().len());
        relay = relay.with_blacklist(checker);
    }

    let forwarder = match &config.forwarder {
        Some(forwarder) => {
            let udp = forwarder.udp_config()?;
            Some(
                UdpForwarder::bind(udp, lockdown.clone())
                    .await
                    .context("Failed to bind DNS forwarder")?,
            )
        }
        None => None,
    };

    info!("Stealth Relay v{} started", stealth_relay::VERSION);

    let forwarder_task = async move {
        match forwarder {
            Some(forwarder) => forwarder.run().await,
            None => std::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        result = relay.run() => result,
        result = forwarder_task => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            Ok(())
        }
    };

    match outcome {
        Ok(()) => Ok(()),
        Err(Error::EmergencyLockdown) => {
            warn!("Stopped by emergency lockdown");
            std::process::exit(2);
        }
        Err(e) => {
            error!("Server failed: {}", e);
            Err(e.into())
        }
    }
}

fn init_logging(logging: &LoggingConfig, override_level: Option<&str>) {
    let level = override_level.unwrap_or(&logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Full => builder.init(),
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

#[cfg(unix)]
fn watch_lockdown_signal(lockdown: Lockdown) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = match signal(SignalKind::user_defined1()) {
        Ok(usr1) => usr1,
        Err(e) => {
            warn!("Cannot watch SIGUSR1, lockdown only via API: {}", e);
            return;
        }
    };

    tokio::spawn(async move {
        if usr1.recv().await.is_some() {
            lockdown.trigger();
        }
    });
}

#[cfg(not(unix))]
fn watch_lockdown_signal(_lockdown: Lockdown) {}

/// Generate and print a random shared secret
fn generate_password() -> Result<()> {
    let mut secret = [0u8; 24];
    random_bytes(&mut secret)?;
    let password = base64::engine::general_purpose::STANDARD.encode(secret);

    println!("Add to the [relay] section of config.toml on server and client:");
    println!("  password = \"{}\"", password);

    Ok(())
}
