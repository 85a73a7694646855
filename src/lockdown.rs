//! Process-wide emergency lockdown
//!
//! Lockdown is a one-way switch. Relays poll it at the top of every copy
//! iteration and listeners wait on it next to `accept`, so a trip stops all
//! traffic within one I/O timeout without interrupting a syscall midway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;
use tracing::warn;

#[derive(Debug, Default)]
struct Inner {
    triggered: AtomicBool,
    notify: Notify,
}

/// Handle to a lockdown switch. Clones share the same switch.
#[derive(Debug, Clone, Default)]
pub struct Lockdown {
    inner: Arc<Inner>,
}

static GLOBAL: OnceLock<Lockdown> = OnceLock::new();

impl Lockdown {
    /// Create an independent switch (tests, embedded use)
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide switch used by the binaries
    pub fn global() -> Lockdown {
        GLOBAL.get_or_init(Lockdown::new).clone()
    }

    /// Trip the switch. There is no way back short of a restart.
    pub fn trigger(&self) {
        if !self.inner.triggered.swap(true, Ordering::SeqCst) {
            warn!("Emergency lockdown triggered");
        }
        self.inner.notify.notify_waiters();
    }

    /// Check whether lockdown is in effect
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once lockdown is in effect
    pub async fn triggered(&self) {
        loop {
            // Register before checking so a trigger in between is not lost
            let notified = self.inner.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}
