//! Connecting to a relay

use super::ProxyError;
use crate::crypto::Cipher;
use crate::obfuscation::{write_with_retry, RetryConfig};
use crate::protocol::Address;
use crate::transport::{CipherStream, TransportError};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Opens relay streams for destinations
#[derive(Debug, Clone)]
pub struct RelayClient {
    server: String,
    cipher: Cipher,
    retry: RetryConfig,
    connect_timeout: Duration,
}

impl RelayClient {
    pub fn new(server: impl Into<String>, cipher: Cipher) -> Self {
        Self {
            server: server.into(),
            cipher,
            retry: RetryConfig::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Set the retry policy for the address header
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the relay connect deadline
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Relay address
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Retry policy shared with the local control exchange
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Connect to the relay and announce `dest`. The returned stream
    /// carries payload for `dest` in both directions.
    pub async fn connect(&self, dest: &Address) -> Result<CipherStream<TcpStream>, ProxyError> {
        let socket = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.server))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;
        socket.set_nodelay(true).ok();

        let mut stream = CipherStream::new(socket, self.cipher.new_state());
        let header = dest.to_bytes()?;
        write_with_retry(&mut stream, &header, &self.retry).await?;

        debug!("Relay stream to {} via {}", dest, self.server);
        Ok(stream)
    }
}
