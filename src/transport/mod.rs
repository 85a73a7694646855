//! Transport layer
//!
//! Provides:
//! - [`CipherStream`]: stream-cipher wrapper over any byte stream
//! - [`TcpTransport`]: bounded-time upstream dialing with destination checks
//! - Helpers for classifying I/O errors and address ranges

mod cipher_stream;
mod tcp;

pub use cipher_stream::{
    CipherReadHalf, CipherStream, CipherWriteHalf, DecryptedReader, EncryptedWriter,
};
pub use tcp::TcpTransport;

use crate::protocol::{HANDSHAKE_TIMEOUT, IO_TIMEOUT};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Destination {0} is in a reserved address range")]
    ReservedDestination(SocketAddr),

    #[error("Connection closed")]
    Closed,

    #[error("Timeout")]
    Timeout,
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upstream dial deadline
    pub connect_timeout: Duration,
    /// Address header deadline
    pub handshake_timeout: Duration,
    /// Per-read/per-write deadline while relaying
    pub io_timeout: Duration,
    /// Permit loopback, private and other reserved destinations
    pub allow_reserved_destinations: bool,
    /// Disable Nagle on upstream sockets
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            io_timeout: IO_TIMEOUT,
            allow_reserved_destinations: false,
            nodelay: true,
        }
    }
}

/// Whether an I/O error means the peer is gone, so retrying is pointless
pub fn is_closed_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Whether `ip` is loopback, private, shared, link-local, documentation,
/// benchmarking or otherwise not publicly routable
pub fn is_reserved_addr(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_reserved_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_reserved_v4(v4),
            None => is_reserved_v6(v6),
        },
    }
}

fn is_reserved_v4(ip: Ipv4Addr) -> bool {
    const RANGES: [([u8; 4], u8); 13] = [
        ([0, 0, 0, 0], 8),
        ([10, 0, 0, 0], 8),
        ([100, 64, 0, 0], 10),
        ([127, 0, 0, 0], 8),
        ([169, 254, 0, 0], 16),
        ([172, 16, 0, 0], 12),
        ([192, 0, 0, 0], 24),
        ([192, 0, 2, 0], 24),
        ([192, 168, 0, 0], 16),
        ([198, 18, 0, 0], 15),
        ([198, 51, 100, 0], 24),
        ([203, 0, 113, 0], 24),
        ([240, 0, 0, 0], 4),
    ];

    let addr = u32::from(ip);
    RANGES.iter().any(|(net, prefix)| {
        let mask = u32::MAX << (32 - u32::from(*prefix));
        addr & mask == u32::from_be_bytes(*net) & mask
    })
}

fn is_reserved_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || first & 0xfe00 == 0xfc00
        // fe80::/10 link local
        || first & 0xffc0 == 0xfe80
}
