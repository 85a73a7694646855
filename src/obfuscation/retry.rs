//! Retrying control I/O
//!
//! Small control exchanges (the address header, for instance) go through
//! these helpers instead of plain `read`/`write_all`:
//! - at most `max_attempts` tries with `(attempt + 1) * backoff_step` pauses
//! - "closed/broken" errors give up at once
//! - writes are cut into 1..=`max_portions` pieces with millisecond gaps
//! - an error after part of a piece went through ends the stream for good

use super::rand_num;
use crate::transport::is_closed_error;
use serde::{Deserialize, Serialize};
use std::io;
use std::ops::Range;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, timeout};
use tracing::trace;

/// Retry policy for control reads and writes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per read or per write portion
    pub max_attempts: u32,
    /// Backoff unit (milliseconds); attempt `n` waits `(n + 1) * step`
    pub backoff_step_ms: u64,
    /// Upper bound of write portions
    pub max_portions: u64,
    /// Deadline of each attempt (seconds)
    pub attempt_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step_ms: 500,
            max_portions: 4,
            attempt_timeout_secs: 120,
        }
    }
}

impl RetryConfig {
    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(u64::from(attempt + 1) * self.backoff_step_ms)
    }

    fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{} timed out", what))
}

/// Read into `buf` with bounded retries. Returns what a single successful
/// `read` returned (0 on EOF).
pub async fn read_with_retry<R>(reader: &mut R, buf: &mut [u8], config: &RetryConfig) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut attempt = 0;
    loop {
        let err = match timeout(config.attempt_timeout(), reader.read(buf)).await {
            Ok(Ok(n)) => {
                trace!("read {} bytes after {} attempts", n, attempt + 1);
                return Ok(n);
            }
            Ok(Err(e)) if is_closed_error(&e) => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => timed_out("read"),
        };

        if attempt + 1 >= config.attempts() {
            return Err(err);
        }
        trace!("read attempt {} failed: {}", attempt + 1, err);
        sleep(config.backoff(attempt)).await;
        attempt += 1;
    }
}

/// Fill `buf` through [`read_with_retry`]; EOF before it is full is an error
pub async fn read_exact_with_retry<R>(reader: &mut R, buf: &mut [u8], config: &RetryConfig) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match read_with_retry(reader, &mut buf[filled..], config).await? {
            0 => return Err(io::ErrorKind::UnexpectedEof.into()),
            n => filled += n,
        }
    }
    Ok(())
}

/// Write all of `buf` in a random number of portions, each retried on its
/// own. Returns the number of bytes written.
pub async fn write_with_retry<W>(writer: &mut W, buf: &[u8], config: &RetryConfig) -> io::Result<usize>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let count = rand_num(1, 0, config.max_portions.max(1));
    let portions = split_portions(buf.len(), count as usize);
    let last = portions.len().saturating_sub(1);

    let mut total = 0;
    for (i, range) in portions.into_iter().enumerate() {
        write_portion(writer, &buf[range.clone()], config).await?;
        total += range.len();

        if i < last {
            sleep(Duration::from_millis(rand_num(1, 0, count))).await;
        }
    }

    writer.flush().await?;
    trace!("wrote {} bytes in {} portions", total, last + 1);
    Ok(total)
}

async fn write_portion<W>(writer: &mut W, portion: &[u8], config: &RetryConfig) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut written = 0;
    let mut attempt = 0;
    loop {
        let result = timeout(
            config.attempt_timeout(),
            write_from(writer, portion, &mut written),
        )
        .await;

        let err = match result {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => timed_out("write"),
        };

        // Partial progress means the peer has seen a truncated frame
        if written > 0 || is_closed_error(&err) || attempt + 1 >= config.attempts() {
            return Err(err);
        }
        trace!("write attempt {} failed: {}", attempt + 1, err);
        sleep(config.backoff(attempt)).await;
        attempt += 1;
    }
}

async fn write_from<W>(writer: &mut W, data: &[u8], written: &mut usize) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    while *written < data.len() {
        let n = writer.write(&data[*written..]).await?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        *written += n;
    }
    Ok(())
}

/// Cut `len` bytes into `count` contiguous ranges of equal size, the last
/// one taking the remainder. `count` is clamped to `1..=len`.
pub fn split_portions(len: usize, count: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let count = count.clamp(1, len);
    let size = len / count;

    (0..count)
        .map(|i| {
            let start = i * size;
            let end = if i + 1 == count { len } else { start + size };
            start..end
        })
        .collect()
}
