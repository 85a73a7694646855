//! Timing obfuscation for rejected connections
//!
//! A scanner that sends garbage must not be able to tell from the close
//! timing whether it hit a parser error, a dial failure, or a slow but
//! legitimate handshake. Every rejection therefore waits a uniformly random
//! time before the socket is dropped.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Timing obfuscation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Upper bound of the rejection delay (milliseconds, 0 = close at once)
    pub reject_delay_max_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reject_delay_max_ms: 3000,
        }
    }
}

impl TimingConfig {
    /// Create config with no timing obfuscation (for testing)
    pub fn disabled() -> Self {
        Self {
            reject_delay_max_ms: 0,
        }
    }

    /// Random delay in `[0, reject_delay_max_ms)`
    pub fn reject_delay(&self) -> Duration {
        if self.reject_delay_max_ms == 0 {
            return Duration::ZERO;
        }
        let ms = rand::thread_rng().gen_range(0..self.reject_delay_max_ms);
        Duration::from_millis(ms)
    }

    /// Sleep for a random rejection delay
    pub async fn delay_reject(&self) {
        let delay = self.reject_delay();
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}
