//! One direction of a relayed connection

use crate::lockdown::Lockdown;
use crate::protocol::RELAY_CHUNK_SIZE;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{trace, warn};

/// Why a pipe stopped copying
#[derive(Debug)]
pub enum PipeEnd {
    /// Source reached EOF
    SourceClosed,
    /// Reading the source failed or idled out
    SourceError(io::Error),
    /// Writing the sink failed or idled out
    SinkError(io::Error),
    /// Emergency lockdown seen at the top of an iteration
    Lockdown,
    /// The companion direction ended first
    Stopped,
}

impl PipeEnd {
    /// Whether the source connection is the one that went away
    pub fn is_source_end(&self) -> bool {
        matches!(self, PipeEnd::SourceClosed | PipeEnd::SourceError(_))
    }
}

/// What a finished pipe hands back
#[derive(Debug)]
pub struct PipeOutcome<R, W> {
    pub reader: R,
    pub writer: W,
    /// Payload bytes delivered to the sink
    pub bytes: u64,
    pub end: PipeEnd,
}

/// Copy `reader` into `writer` in small chunks until either side fails, the
/// source idles past `io_timeout`, lockdown trips, or `stop` fires.
///
/// Both halves are returned so the caller can still pad or shut them down.
pub async fn pipe<R, W>(
    mut reader: R,
    mut writer: W,
    io_timeout: Duration,
    lockdown: Lockdown,
    mut stop: watch::Receiver<bool>,
) -> PipeOutcome<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_CHUNK_SIZE];
    let mut bytes = 0u64;

    let end = loop {
        if lockdown.is_triggered() {
            warn!("Relay aborted by emergency lockdown");
            break PipeEnd::Lockdown;
        }
        if *stop.borrow() {
            break PipeEnd::Stopped;
        }

        let read = tokio::select! {
            _ = stop.changed() => break PipeEnd::Stopped,
            r = timeout(io_timeout, reader.read(&mut buf)) => r,
        };
        let n = match read {
            Ok(Ok(0)) => break PipeEnd::SourceClosed,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => break PipeEnd::SourceError(e),
            Err(_) => break PipeEnd::SourceError(idle("read")),
        };

        let written = tokio::select! {
            _ = stop.changed() => break PipeEnd::Stopped,
            w = timeout(io_timeout, writer.write_all(&buf[..n])) => w,
        };
        match written {
            Ok(Ok(())) => bytes += n as u64,
            Ok(Err(e)) => break PipeEnd::SinkError(e),
            Err(_) => break PipeEnd::SinkError(idle("write")),
        }
    };

    trace!("Pipe finished after {} bytes: {:?}", bytes, end);
    PipeOutcome {
        reader,
        writer,
        bytes,
        end,
    }
}

fn idle(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{} idle timeout", what))
}
