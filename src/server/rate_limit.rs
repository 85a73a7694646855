//! Per-IP admission control
//!
//! Fixed windows: every IP may be admitted `max_per_window` times per
//! window, after which it is refused until the table rotates. The table is
//! touched by every accept path, so the lock is held only for one lookup and
//! increment.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::info;

/// Rate limiter with rotating per-IP counters
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<Window>,
    max_per_window: u32,
    window: Duration,
}

#[derive(Debug)]
struct Window {
    started: Instant,
    counters: HashMap<IpAddr, u32>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            state: Mutex::new(Window {
                started: Instant::now(),
                counters: HashMap::new(),
            }),
            max_per_window,
            window,
        }
    }

    /// Count one admission for `ip`; `false` means refuse it
    pub fn add(&self, ip: IpAddr) -> bool {
        self.add_at(ip, Instant::now())
    }

    fn add_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut state = self.state.lock();

        if now.duration_since(state.started) >= self.window {
            state.counters.clear();
            state.started = now;
        }

        let count = state.counters.entry(ip).or_insert(0);
        if *count >= self.max_per_window {
            // Log once per window, not for every refused attempt
            if *count == self.max_per_window {
                info!("{} exceeded {} admissions per {:?}", ip, self.max_per_window, self.window);
                *count += 1;
            }
            return false;
        }

        *count += 1;
        true
    }

    /// Number of IPs seen in the current window
    pub fn tracked_count(&self) -> usize {
        self.state.lock().counters.len()
    }
}
