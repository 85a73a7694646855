//! Client side of the relay
//!
//! Provides:
//! - [`RelayClient`]: opens an encrypted stream to a relay for one destination
//! - SOCKS5 CONNECT front end for local applications

mod client;

#[cfg(feature = "socks5")]
mod socks5;

pub use client::RelayClient;

#[cfg(feature = "socks5")]
pub use socks5::Socks5Server;

use crate::protocol::ProtocolError;
use crate::transport::TransportError;
use thiserror::Error;

/// Proxy errors
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid SOCKS version: {0}")]
    InvalidSocksVersion(u8),

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(u8),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Bad destination: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Relay unreachable: {0}")]
    Transport(#[from] TransportError),
}
