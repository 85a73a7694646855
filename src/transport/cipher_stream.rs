//! Encrypted byte stream
//!
//! [`CipherStream`] wraps any `AsyncRead + AsyncWrite` transport. The first
//! read consumes the peer's IV before producing plaintext; the first write
//! prepends our own IV. After that both directions are plain stream-cipher
//! transforms, so byte counts on the wire equal plaintext counts.

use crate::crypto::{CipherState, DecryptState, EncryptState, MAX_IV_LEN};
use bytes::BytesMut;
use std::io::{self, ErrorKind};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::trace;

/// Reading side: IV collection, then in-place decryption
#[derive(Debug)]
pub struct DecryptedReader {
    state: DecryptState,
    iv: Vec<u8>,
}

impl DecryptedReader {
    pub fn new(state: DecryptState) -> Self {
        let iv_len = state.iv_len();
        Self {
            state,
            iv: Vec::with_capacity(iv_len),
        }
    }

    /// Whether the peer's IV has arrived
    pub fn handshaked(&self) -> bool {
        self.state.is_initialized()
    }

    /// Read and decrypt from `stream` into `buf`
    pub fn poll_read_decrypted<S>(
        &mut self,
        cx: &mut Context<'_>,
        stream: &mut S,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>>
    where
        S: AsyncRead + Unpin + ?Sized,
    {
        while !self.state.is_initialized() {
            let iv_len = self.state.iv_len();
            let mut scratch = [0u8; MAX_IV_LEN];
            let mut iv_buf = ReadBuf::new(&mut scratch[..iv_len - self.iv.len()]);
            ready!(Pin::new(&mut *stream).poll_read(cx, &mut iv_buf))?;

            let n = iv_buf.filled().len();
            if n == 0 {
                // Clean EOF only if the peer never started its IV
                return if self.iv.is_empty() {
                    Poll::Ready(Ok(()))
                } else {
                    Poll::Ready(Err(ErrorKind::UnexpectedEof.into()))
                };
            }

            self.iv.extend_from_slice(iv_buf.filled());
            if self.iv.len() == iv_len {
                self.state.init(&self.iv)?;
                trace!("received stream IV ({} bytes)", iv_len);
            }
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut *stream).poll_read(cx, buf))?;
        let fresh = &mut buf.filled_mut()[before..];
        if !fresh.is_empty() {
            self.state.decrypt(fresh)?;
        }

        Poll::Ready(Ok(()))
    }
}

/// Writing side: encrypt into an owned buffer, then drain it
///
/// Like any `poll_write`, a call that returned `Pending` must be repeated
/// with the same data; the ciphertext of the first attempt is kept until it
/// is fully written.
#[derive(Debug)]
pub struct EncryptedWriter {
    state: EncryptState,
    buffer: BytesMut,
    pos: usize,
    accepted: usize,
}

impl EncryptedWriter {
    pub fn new(state: EncryptState) -> Self {
        Self {
            state,
            buffer: BytesMut::new(),
            pos: 0,
            accepted: 0,
        }
    }

    /// Encrypt `buf` and write it to `stream`
    pub fn poll_write_encrypted<S>(
        &mut self,
        cx: &mut Context<'_>,
        stream: &mut S,
        buf: &[u8],
    ) -> Poll<io::Result<usize>>
    where
        S: AsyncWrite + Unpin + ?Sized,
    {
        if self.buffer.is_empty() {
            if buf.is_empty() {
                return Poll::Ready(Ok(0));
            }
            self.state.encrypt_into(buf, &mut self.buffer)?;
            self.pos = 0;
            self.accepted = buf.len();
        }

        ready!(self.poll_drain(cx, stream))?;
        Poll::Ready(Ok(self.accepted))
    }

    /// Write out whatever ciphertext is still buffered
    pub fn poll_drain<S>(&mut self, cx: &mut Context<'_>, stream: &mut S) -> Poll<io::Result<()>>
    where
        S: AsyncWrite + Unpin + ?Sized,
    {
        while self.pos < self.buffer.len() {
            let n = ready!(Pin::new(&mut *stream).poll_write(cx, &self.buffer[self.pos..]))?;
            if n == 0 {
                return Poll::Ready(Err(ErrorKind::WriteZero.into()));
            }
            self.pos += n;
        }
        self.buffer.clear();
        self.pos = 0;
        Poll::Ready(Ok(()))
    }
}

/// Bidirectional encrypted stream
#[derive(Debug)]
pub struct CipherStream<S> {
    stream: S,
    reader: DecryptedReader,
    writer: EncryptedWriter,
}

impl<S> CipherStream<S> {
    /// Wrap `stream` with one connection's cipher state
    pub fn new(stream: S, state: CipherState) -> Self {
        let (decrypt, encrypt) = state.split();
        Self {
            stream,
            reader: DecryptedReader::new(decrypt),
            writer: EncryptedWriter::new(encrypt),
        }
    }

    /// Underlying transport
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Take the stream apart
    pub fn into_parts(self) -> (S, DecryptedReader, EncryptedWriter) {
        (self.stream, self.reader, self.writer)
    }
}

impl CipherStream<TcpStream> {
    /// Split into independently owned halves, one per relay direction
    pub fn into_split(self) -> (CipherReadHalf<OwnedReadHalf>, CipherWriteHalf<OwnedWriteHalf>) {
        let (r, w) = self.stream.into_split();
        (
            CipherReadHalf {
                inner: r,
                reader: self.reader,
            },
            CipherWriteHalf {
                inner: w,
                writer: self.writer,
            },
        )
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CipherStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.reader.poll_read_decrypted(cx, &mut this.stream, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CipherStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.writer.poll_write_encrypted(cx, &mut this.stream, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.writer.poll_drain(cx, &mut this.stream))?;
        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.writer.poll_drain(cx, &mut this.stream))?;
        Pin::new(&mut this.stream).poll_shutdown(cx)
    }
}

/// Decrypting read half
#[derive(Debug)]
pub struct CipherReadHalf<R> {
    inner: R,
    reader: DecryptedReader,
}

impl<R> CipherReadHalf<R> {
    pub fn new(inner: R, reader: DecryptedReader) -> Self {
        Self { inner, reader }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CipherReadHalf<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.reader.poll_read_decrypted(cx, &mut this.inner, buf)
    }
}

/// Encrypting write half
#[derive(Debug)]
pub struct CipherWriteHalf<W> {
    inner: W,
    writer: EncryptedWriter,
}

impl<W> CipherWriteHalf<W> {
    pub fn new(inner: W, writer: EncryptedWriter) -> Self {
        Self { inner, writer }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CipherWriteHalf<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.writer.poll_write_encrypted(cx, &mut this.inner, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.writer.poll_drain(cx, &mut this.inner))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.writer.poll_drain(cx, &mut this.inner))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
