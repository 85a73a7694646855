//! Lifecycle of one relayed connection
//!
//! handshake → dial → two pipes → padding → close

use super::pipe::{pipe, PipeEnd};
use crate::crypto::CipherState;
use crate::lockdown::Lockdown;
use crate::obfuscation::{write_padding, ObfuscationConfig};
use crate::protocol::{parse_request, Address};
use crate::transport::{CipherStream, TcpTransport};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Everything a connection handler needs, shared by all connections
#[derive(Debug, Clone)]
pub struct RelayContext {
    pub transport: TcpTransport,
    pub obfuscation: ObfuscationConfig,
    pub lockdown: Lockdown,
}

impl RelayContext {
    pub fn new(transport: TcpTransport, obfuscation: ObfuscationConfig, lockdown: Lockdown) -> Self {
        Self {
            transport,
            obfuscation,
            lockdown,
        }
    }

    /// Wait out a randomized delay before a rejected socket is dropped
    async fn reject(&self) {
        self.obfuscation.timing.delay_reject().await;
    }
}

/// Byte counts of a finished relay
#[derive(Debug, Clone)]
pub struct RelayStats {
    pub dest: Address,
    /// Client to destination payload bytes
    pub bytes_up: u64,
    /// Destination to client payload bytes
    pub bytes_down: u64,
    /// Cover bytes written to the client, not part of either count
    pub padding: usize,
}

/// Serve one accepted client socket with its own cipher state
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: CipherState,
    ctx: Arc<RelayContext>,
) -> Result<RelayStats> {
    if ctx.lockdown.is_triggered() {
        return Err(Error::EmergencyLockdown);
    }

    let transport_config = ctx.transport.config();
    let mut client = CipherStream::new(stream, state);

    let dest = match parse_request(&mut client, transport_config.handshake_timeout).await {
        Ok(dest) => dest,
        Err(e) => {
            warn!(%peer, "Failed to read destination address: {}", e);
            ctx.reject().await;
            return Err(e.into());
        }
    };

    let upstream = match ctx.transport.connect(&dest).await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(%peer, %dest, "Failed to connect to destination: {}", e);
            ctx.reject().await;
            return Err(e.into());
        }
    };
    debug!(%peer, %dest, "Relaying");

    let (client_r, client_w) = client.into_split();
    let (upstream_r, upstream_w) = upstream.into_split();
    let io_timeout = transport_config.io_timeout;
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut up = tokio::spawn(pipe(
        client_r,
        upstream_w,
        io_timeout,
        ctx.lockdown.clone(),
        stop_rx.clone(),
    ));
    let mut down = tokio::spawn(pipe(
        upstream_r,
        client_w,
        io_timeout,
        ctx.lockdown.clone(),
        stop_rx,
    ));

    // Whichever direction ends first stops the other, then closes its sink
    let (up, down) = tokio::select! {
        up_done = &mut up => {
            let _ = stop_tx.send(true);
            let mut up_done = up_done.map_err(join_error)?;
            close(&mut up_done.writer, io_timeout).await;
            (up_done, down.await.map_err(join_error)?)
        }
        down_done = &mut down => {
            let _ = stop_tx.send(true);
            let mut down_done = down_done.map_err(join_error)?;
            close(&mut down_done.writer, io_timeout).await;
            (up.await.map_err(join_error)?, down_done)
        }
    };

    let mut client_w = down.writer;
    let mut upstream_w = up.writer;
    close(&mut upstream_w, io_timeout).await;
    drop(upstream_w);
    drop(down.reader);

    // The client link is the one an observer watches
    let padding = if up.end.is_source_end() && !ctx.lockdown.is_triggered() {
        write_padding(&mut client_w, &ctx.obfuscation.padding).await
    } else {
        0
    };
    close(&mut client_w, io_timeout).await;

    let stats = RelayStats {
        dest,
        bytes_up: up.bytes,
        bytes_down: down.bytes,
        padding,
    };

    if matches!(up.end, PipeEnd::Lockdown) || matches!(down.end, PipeEnd::Lockdown) {
        warn!(%peer, dest = %stats.dest, "Relay stopped by emergency lockdown");
        return Err(Error::EmergencyLockdown);
    }

    info!(
        %peer,
        dest = %stats.dest,
        "Relay closed: {} bytes up, {} bytes down",
        stats.bytes_up,
        stats.bytes_down
    );
    debug!(%peer, "Relay ends: up {:?}, down {:?}", up.end, down.end);
    Ok(stats)
}

/// Shut `writer` down, giving up once `deadline` passes. A peer that never
/// reads cannot hold the connection open through a pending flush.
async fn close<W: AsyncWrite + Unpin>(writer: &mut W, deadline: Duration) {
    match timeout(deadline, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => trace!("Shutdown failed: {}", e),
        Err(_) => trace!("Shutdown abandoned after {:?}", deadline),
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}
