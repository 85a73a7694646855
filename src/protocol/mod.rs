//! Protocol definitions and constants
//!
//! The relay protocol has no framing of its own: after the cipher IV, the
//! first plaintext bytes of a client stream are a SOCKS5-style address
//! header, and everything that follows is opaque payload.

mod address;

pub use address::{parse_request, Address, AddressType};

use std::time::Duration;
use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown address type {0:#04x}")]
    UnknownAddressType(u8),

    #[error("Destination address contains a NUL byte")]
    NulInAddress,

    #[error("Invalid domain name in address header")]
    InvalidDomain,

    #[error("Address header not received in time")]
    HandshakeTimeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Only the low nibble of the address type byte is significant
pub const ADDRESS_TYPE_MASK: u8 = 0x0F;

/// Deadline for receiving the whole address header
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-read/per-write deadline while relaying
pub const IO_TIMEOUT: Duration = Duration::from_secs(120);

/// Relay copy chunk, small enough to stay clear of IP fragmentation
pub const RELAY_CHUNK_SIZE: usize = 1280;
