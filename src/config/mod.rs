//! Configuration management

use crate::blacklist::{BlacklistChecker, DEFAULT_PROVIDERS};
use crate::crypto::{Cipher, CipherKind};
use crate::obfuscation::ObfuscationConfig;
use crate::server::UdpForwarderConfig;
use crate::transport::TransportConfig;
use crate::{Error, Result, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Listen address used when none is configured
const DEFAULT_LISTEN: &str = "0.0.0.0";

/// Per-IP connection limit used when none is configured
const DEFAULT_PER_IP_LIMIT: u32 = 96;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// TCP relay
    #[serde(default)]
    pub relay: RelayConfig,
    /// UDP DNS forwarder, disabled when absent
    pub forwarder: Option<ForwarderConfig>,
    /// DNSBL admission gate
    #[serde(default)]
    pub blacklist: BlacklistConfig,
    /// Cover traffic and timing
    #[serde(default)]
    pub obfuscation: ObfuscationConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Local SOCKS5 client
    pub client: Option<ClientConfig>,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))
    }

    /// Fill in safe defaults and reject configurations that cannot run.
    ///
    /// The shared secret is never defaulted.
    pub fn validate(&mut self) -> Result<()> {
        self.relay.validate()?;

        if let Some(forwarder) = self.forwarder.as_mut() {
            forwarder.validate()?;
        }

        if let Some(client) = &self.client {
            if client.server.trim().is_empty() {
                return Err(Error::Config("client.server is required".into()));
            }
        }

        Ok(())
    }
}

/// TCP relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listen address, without the port
    pub listen: String,
    /// Listen port
    pub port: u16,
    /// Shared secret
    pub password: String,
    /// Cipher method name
    pub method: String,
    /// New connections per client IP per second
    pub per_ip_limit: u32,
    /// Permit loopback, private and other reserved destinations
    pub allow_reserved_destinations: bool,
    /// Upstream dial deadline in seconds
    pub connect_timeout_secs: u64,
    /// Address header deadline in seconds
    pub handshake_timeout_secs: u64,
    /// Per-read/per-write deadline while relaying, in seconds
    pub io_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            listen: String::new(),
            port: 0,
            password: String::new(),
            method: CipherKind::default().name().to_string(),
            per_ip_limit: 0,
            allow_reserved_destinations: false,
            connect_timeout_secs: transport.connect_timeout.as_secs(),
            handshake_timeout_secs: transport.handshake_timeout.as_secs(),
            io_timeout_secs: transport.io_timeout.as_secs(),
        }
    }
}

impl RelayConfig {
    fn validate(&mut self) -> Result<()> {
        if self.listen.trim().is_empty() {
            self.listen = DEFAULT_LISTEN.to_string();
        }
        if self.per_ip_limit == 0 {
            self.per_ip_limit = DEFAULT_PER_IP_LIMIT;
        }
        if self.port == 0 {
            return Err(Error::Config("relay.port: listen port is required".into()));
        }
        if self.password.is_empty() {
            return Err(Error::Config("relay.password is required".into()));
        }
        self.kind()?;
        self.listen_addr()?;

        if self.connect_timeout_secs == 0
            || self.io_timeout_secs == 0
            || self.handshake_timeout_secs == 0
        {
            return Err(Error::Config("relay timeouts must be positive".into()));
        }
        Ok(())
    }

    fn kind(&self) -> Result<CipherKind> {
        self.method
            .parse()
            .map_err(|e| Error::Config(format!("relay.method: {}", e)))
    }

    /// Socket address the relay listens on
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.listen, self.port, "relay.listen")
    }

    /// Cipher built from the method and shared secret
    pub fn cipher(&self) -> Result<Cipher> {
        Ok(Cipher::new(self.kind()?, &self.password)?)
    }

    /// Dial and relay deadlines
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            io_timeout: Duration::from_secs(self.io_timeout_secs),
            allow_reserved_destinations: self.allow_reserved_destinations,
            ..TransportConfig::default()
        }
    }
}

/// UDP DNS forwarder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Listen address, without the port
    pub listen: String,
    /// Listen port
    pub port: u16,
    /// Upstream resolvers as `ip:port`
    pub upstreams: Vec<String>,
    /// Number of persistent upstream sockets
    pub pool_size: usize,
    /// Pending queries per upstream socket
    pub queue_depth: usize,
    /// Upstream exchange deadline in seconds
    pub timeout_secs: u64,
    /// Client IP prefixes allowed to query; empty allows everyone
    pub allow_prefixes: Vec<String>,
    /// Names answered with 0.0.0.0
    pub deny_names: Vec<String>,
    /// Queries per client IP per second
    pub per_ip_limit: u32,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        let defaults = UdpForwarderConfig::default();
        Self {
            listen: String::new(),
            port: defaults.listen.port(),
            upstreams: defaults.upstreams.iter().map(|u| u.to_string()).collect(),
            pool_size: defaults.pool_size,
            queue_depth: defaults.queue_depth,
            timeout_secs: defaults.io_timeout.as_secs(),
            allow_prefixes: Vec::new(),
            deny_names: Vec::new(),
            per_ip_limit: 0,
        }
    }
}

impl ForwarderConfig {
    fn validate(&mut self) -> Result<()> {
        if self.listen.trim().is_empty() {
            self.listen = DEFAULT_LISTEN.to_string();
        }
        if self.per_ip_limit == 0 {
            self.per_ip_limit = DEFAULT_PER_IP_LIMIT;
        }
        if self.port == 0 {
            return Err(Error::Config("forwarder.port: listen port is required".into()));
        }
        if self.upstreams.is_empty() {
            return Err(Error::Config("forwarder.upstreams must not be empty".into()));
        }
        if self.pool_size == 0 || self.queue_depth == 0 {
            return Err(Error::Config(
                "forwarder.pool_size and forwarder.queue_depth must be positive".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("forwarder.timeout_secs must be positive".into()));
        }
        self.udp_config()?;
        Ok(())
    }

    /// Runtime forwarder settings
    pub fn udp_config(&self) -> Result<UdpForwarderConfig> {
        let upstreams = self
            .upstreams
            .iter()
            .map(|u| {
                u.parse::<SocketAddr>()
                    .map_err(|e| Error::Config(format!("forwarder.upstreams: {}: {}", u, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(UdpForwarderConfig {
            listen: socket_addr(&self.listen, self.port, "forwarder.listen")?,
            upstreams,
            pool_size: self.pool_size,
            queue_depth: self.queue_depth,
            io_timeout: Duration::from_secs(self.timeout_secs),
            allow_prefixes: self.allow_prefixes.clone(),
            deny_names: self.deny_names.clone(),
            per_ip_limit: self.per_ip_limit,
        })
    }
}

/// DNSBL gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistConfig {
    pub enabled: bool,
    /// Provider zones; empty uses the built-in list
    pub providers: Vec<String>,
    /// Shared deadline for one check, in milliseconds
    pub timeout_ms: u64,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            providers: Vec::new(),
            timeout_ms: 3000,
        }
    }
}

impl BlacklistConfig {
    /// Checker for the configured providers, `None` when disabled
    pub fn checker(&self) -> Option<BlacklistChecker> {
        if !self.enabled {
            return None;
        }

        let providers = if self.providers.is_empty() {
            DEFAULT_PROVIDERS.iter().map(|p| p.to_string()).collect()
        } else {
            self.providers.clone()
        };
        Some(BlacklistChecker::new(
            providers,
            Duration::from_millis(self.timeout_ms),
        ))
    }
}

/// Local SOCKS5 client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay address as `host:port`
    pub server: String,
    /// Local SOCKS5 proxy address
    pub socks5_listen: String,
    /// Optional SOCKS5 username
    pub username: Option<String>,
    /// Optional SOCKS5 password
    pub password: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", DEFAULT_PORT),
            socks5_listen: "127.0.0.1:1080".to_string(),
            username: None,
            password: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Output format of the `tracing` subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line records with all fields
    Full,
    /// Shorter single-line records
    Compact,
    /// Multi-line, human-oriented records
    #[default]
    Pretty,
}

fn socket_addr(host: &str, port: u16, field: &str) -> Result<SocketAddr> {
    let ip: IpAddr = host
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .map_err(|e| Error::Config(format!("{}: {}: {}", field, host, e)))?;
    Ok(SocketAddr::new(ip, port))
}

/// Generate example configuration
pub fn generate_example_config() -> Config {
    Config {
        relay: RelayConfig {
            listen: DEFAULT_LISTEN.to_string(),
            port: DEFAULT_PORT,
            password: "change-me".to_string(),
            per_ip_limit: DEFAULT_PER_IP_LIMIT,
            ..RelayConfig::default()
        },
        forwarder: Some(ForwarderConfig {
            listen: DEFAULT_LISTEN.to_string(),
            per_ip_limit: DEFAULT_PER_IP_LIMIT,
            ..ForwarderConfig::default()
        }),
        blacklist: BlacklistConfig::default(),
        obfuscation: ObfuscationConfig::default(),
        logging: LoggingConfig::default(),
        client: Some(ClientConfig::default()),
    }
}
