//! TCP relay listener

use super::rate_limit::RateLimiter;
use crate::blacklist::BlacklistChecker;
use crate::crypto::Cipher;
use crate::relay::{handle_connection, RelayContext};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, error, info, warn};

/// Accepts relay clients and serves each on its own task
pub struct TcpRelayServer {
    listener: TcpListener,
    cipher: Cipher,
    ctx: Arc<RelayContext>,
    rate_limiter: RateLimiter,
    blacklist: Option<BlacklistChecker>,
}

impl TcpRelayServer {
    /// Bind the listener
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        cipher: Cipher,
        ctx: RelayContext,
        per_ip_limit: u32,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(
            "Relay listening on {} ({})",
            listener.local_addr()?,
            cipher.kind()
        );

        Ok(Self {
            listener,
            cipher,
            ctx: Arc::new(ctx),
            rate_limiter: RateLimiter::new(per_ip_limit, Duration::from_secs(1)),
            blacklist: None,
        })
    }

    /// Drop clients listed by any DNSBL provider before their handshake
    pub fn with_blacklist(mut self, checker: BlacklistChecker) -> Self {
        self.blacklist = Some(checker);
        self
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until emergency lockdown, which is reported as
    /// [`Error::EmergencyLockdown`]
    pub async fn run(self) -> Result<()> {
        let lockdown = self.ctx.lockdown.clone();

        loop {
            let (stream, peer) = tokio::select! {
                _ = lockdown.triggered() => {
                    warn!("Relay listener stopping for emergency lockdown");
                    return Err(Error::EmergencyLockdown);
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
            };

            if lockdown.is_triggered() {
                return Err(Error::EmergencyLockdown);
            }

            // Over the limit: close without a word
            if !self.rate_limiter.add(peer.ip()) {
                debug!(%peer, "Rate limited");
                continue;
            }

            let state = self.cipher.new_state();
            let ctx = self.ctx.clone();
            let blacklist = self.blacklist.clone();

            tokio::spawn(async move {
                if let Some(checker) = blacklist {
                    if let Some(provider) = checker.is_blacklisted(peer.ip()).await {
                        info!(%peer, "Dropping client listed by {}", provider);
                        return;
                    }
                }

                if let Err(e) = handle_connection(stream, peer, state, ctx).await {
                    debug!(%peer, "Connection closed with error: {}", e);
                }
            });
        }
    }
}
