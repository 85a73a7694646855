//! Upstream TCP dialing

use super::{is_reserved_addr, TransportConfig, TransportError};
use crate::protocol::Address;
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;

/// Dials relay destinations
#[derive(Debug, Clone)]
pub struct TcpTransport {
    config: TransportConfig,
}

impl TcpTransport {
    /// Create a new TCP transport
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Create with default configuration
    pub fn new_default() -> Self {
        Self::new(TransportConfig::default())
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Resolve and connect to `addr`, trying each resolved address in turn,
    /// all within one connect deadline
    pub async fn connect(&self, addr: &Address) -> Result<TcpStream, TransportError> {
        tokio::time::timeout(self.config.connect_timeout, self.connect_inner(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    async fn connect_inner(&self, addr: &Address) -> Result<TcpStream, TransportError> {
        let candidates: Vec<SocketAddr> = match addr.socket_addr() {
            Some(sa) => vec![sa],
            None => lookup_host((addr.host(), addr.port())).await?.collect(),
        };

        let mut last_err = None;
        for candidate in candidates {
            if !self.config.allow_reserved_destinations && is_reserved_addr(candidate.ip()) {
                debug!("Refusing reserved destination {} for {}", candidate, addr);
                last_err = Some(TransportError::ReservedDestination(candidate));
                continue;
            }

            match TcpStream::connect(candidate).await {
                Ok(stream) => {
                    if self.config.nodelay {
                        stream.set_nodelay(true).ok();
                    }
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", candidate, e);
                    last_err = Some(TransportError::Io(e));
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| TransportError::ConnectionFailed(format!("{} did not resolve", addr))))
    }
}
