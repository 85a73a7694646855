//! # Stealth Relay
//!
//! An encrypted, traffic-obfuscated relay that speaks a SOCKS5-style
//! addressing header over a stream cipher, plus a DNS forwarder and a
//! DNS-blacklist reputation checker used to gate which peers are served.
//!
//! ## Features
//!
//! - **Stream cipher transport** with one IV per direction (AES-CFB, AES-CTR,
//!   ChaCha20-IETF)
//! - **Silent rejection**: failed handshakes are closed after a random delay
//!   and never answered
//! - **Cover traffic**: random padding bursts on teardown, chunked and jittered
//!   control writes
//! - **Admission control**: per-IP rate limiting and optional DNSBL checks
//! - **UDP DNS forwarder** with a fixed pool of upstream sockets and a deny list
//! - **Emergency lockdown** that stops every relay promptly
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Listener Layer                      │
//! │     (TCP accept loop, UDP forwarder, rate limit)     │
//! ├─────────────────────────────────────────────────────┤
//! │                  Admission Layer                     │
//! │           (DNSBL checker, reserved ranges)           │
//! ├─────────────────────────────────────────────────────┤
//! │                   Relay Layer                        │
//! │     (address header, upstream dial, two pipes)       │
//! ├─────────────────────────────────────────────────────┤
//! │                 Obfuscation Layer                    │
//! │   (padding bursts, rejection delays, retry jitter)   │
//! ├─────────────────────────────────────────────────────┤
//! │                  Transport Layer                     │
//! │        (cipher stream over TCP, deadlines)           │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod blacklist;
pub mod config;
pub mod crypto;
pub mod lockdown;
pub mod obfuscation;
pub mod protocol;
pub mod proxy;
pub mod relay;
pub mod server;
pub mod transport;

pub use config::Config;
pub use lockdown::Lockdown;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default TCP port for the relay
pub const DEFAULT_PORT: u16 = 27101;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] proxy::ProxyError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Emergency lockdown is in effect")]
    EmergencyLockdown,

    #[error("Timeout")]
    Timeout,
}
