//! Traffic obfuscation layer
//!
//! Provides:
//! - Padding bursts written into dying connections
//! - Randomized rejection delays for failed handshakes
//! - Retrying, portioned control reads and writes
//!
//! All randomness is small and bounded: hundreds of bytes, delays of a few
//! seconds at most. Every constant is configurable.

mod padding;
mod retry;
mod timing;

pub use padding::{write_padding, PaddingConfig};
pub use retry::{
    read_exact_with_retry, read_with_retry, split_portions, write_with_retry, RetryConfig,
};
pub use timing::TimingConfig;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Configuration for traffic obfuscation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfuscationConfig {
    /// Padding bursts on teardown
    pub padding: PaddingConfig,
    /// Rejection delays
    pub timing: TimingConfig,
    /// Control I/O retries
    pub retry: RetryConfig,
}

impl ObfuscationConfig {
    /// No padding and no delays (for tests)
    pub fn disabled() -> Self {
        Self {
            padding: PaddingConfig::disabled(),
            timing: TimingConfig::disabled(),
            retry: RetryConfig::default(),
        }
    }

    /// Set padding config
    pub fn with_padding(mut self, padding: PaddingConfig) -> Self {
        self.padding = padding;
        self
    }

    /// Set timing config
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Set retry config
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// `abs_min + rand[0, var_lower) + rand[0, rand_more)`; a zero bound adds
/// nothing
pub fn rand_num(abs_min: u64, var_lower: u64, rand_more: u64) -> u64 {
    let mut rng = rand::thread_rng();
    let mut n = abs_min;
    if var_lower > 0 {
        n += rng.gen_range(0..var_lower);
    }
    if rand_more > 0 {
        n += rng.gen_range(0..rand_more);
    }
    n
}

/// Uniform value in `[min, max]`, tolerating a reversed or empty range
pub(crate) fn rand_between(min: u64, max: u64) -> u64 {
    if max <= min {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}
