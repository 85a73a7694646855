//! Cover traffic for connections that are going away
//!
//! When a relay's source stops delivering data, a few bursts of random
//! bytes are pushed into that connection before it is dropped, so the bytes
//! an observer sees on the link no longer match what was actually relayed.

use super::rand_between;
use crate::crypto::random_bytes;
use crate::transport::is_closed_error;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Padding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaddingConfig {
    /// Write padding at all
    pub enabled: bool,
    /// Fewest bursts per teardown
    pub min_bursts: u32,
    /// Most bursts per teardown
    pub max_bursts: u32,
    /// Smallest burst in bytes
    pub min_size: usize,
    /// Largest burst in bytes
    pub max_size: usize,
    /// Shortest pause before a burst (milliseconds)
    pub min_delay_ms: u64,
    /// Longest pause before a burst (milliseconds)
    pub max_delay_ms: u64,
    /// Deadline for each burst write (milliseconds)
    pub write_timeout_ms: u64,
}

impl Default for PaddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_bursts: 1,
            max_bursts: 3,
            min_size: 210,
            max_size: 1097,
            min_delay_ms: 890,
            max_delay_ms: 4659,
            write_timeout_ms: 6000,
        }
    }
}

impl PaddingConfig {
    /// Padding switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    fn burst_count(&self) -> u32 {
        rand_between(u64::from(self.min_bursts), u64::from(self.max_bursts)) as u32
    }

    fn burst_size(&self) -> usize {
        rand_between(self.min_size as u64, self.max_size as u64) as usize
    }

    fn burst_delay(&self) -> Duration {
        Duration::from_millis(rand_between(self.min_delay_ms, self.max_delay_ms))
    }
}

/// Write a randomized burst of padding into `writer`. Returns the number of
/// padding bytes that went out; they are never part of relayed counts.
///
/// Errors are swallowed: "closed" errors are expected on a dying link and
/// anything else simply ends the burst sequence.
pub async fn write_padding<W>(writer: &mut W, config: &PaddingConfig) -> usize
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if !config.enabled {
        return 0;
    }

    let write_timeout = Duration::from_millis(config.write_timeout_ms);
    let mut written = 0;

    for _ in 0..config.burst_count() {
        let mut burst = vec![0u8; config.burst_size()];
        if random_bytes(&mut burst).is_err() {
            break;
        }

        tokio::time::sleep(config.burst_delay()).await;

        let result = tokio::time::timeout(write_timeout, async {
            writer.write_all(&burst).await?;
            writer.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => written += burst.len(),
            Ok(Err(e)) if is_closed_error(&e) => {
                trace!("Padding into closed connection: {}", e);
            }
            Ok(Err(e)) => {
                debug!("Padding write failed: {}", e);
                break;
            }
            Err(_) => break,
        }
    }

    trace!("Wrote {} padding bytes", written);
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_padding_shape() {
        let config = PaddingConfig::default();
        for _ in 0..20 {
            let mut sink = Vec::new();
            let written = write_padding(&mut sink, &config).await;

            assert_eq!(written, sink.len());
            assert!(written >= 210, "too little padding: {written}");
            assert!(written <= 3 * 1097, "too much padding: {written}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_padding_delay_window() {
        let config = PaddingConfig {
            min_bursts: 1,
            max_bursts: 1,
            ..Default::default()
        };
        let start = tokio::time::Instant::now();
        let mut sink = Vec::new();
        write_padding(&mut sink, &config).await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(890));
        assert!(elapsed <= Duration::from_millis(4659));
    }

    #[tokio::test]
    async fn test_disabled_writes_nothing() {
        let mut sink = Vec::new();
        assert_eq!(write_padding(&mut sink, &PaddingConfig::disabled()).await, 0);
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_peer_is_tolerated() {
        let (mut a, b) = tokio::io::duplex(16);
        drop(b);
        // Every burst hits a broken pipe; the call still completes
        assert_eq!(write_padding(&mut a, &PaddingConfig::default()).await, 0);
    }
}
