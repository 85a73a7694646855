//! Listeners
//!
//! Provides:
//! - TCP relay listener with per-IP admission and optional DNSBL gate
//! - UDP DNS forwarder with a fixed upstream socket pool and a deny list
//! - The rate limiter both of them use

pub mod dns;
mod rate_limit;
mod tcp;
mod udp;

pub use rate_limit::RateLimiter;
pub use tcp::TcpRelayServer;
pub use udp::{UdpForwarder, UdpForwarderConfig, MAX_PACKET_SIZE};
