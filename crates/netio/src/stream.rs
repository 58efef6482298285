//! Link stream and raw I/O helpers

use bytes::{Buf, Bytes};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

/// An established link handed to exactly one handler
///
/// Bytes consumed while sniffing are replayed before anything else is read
/// from the underlying stream. Writes go straight through.
#[derive(Debug)]
pub struct Link<S = TcpStream> {
    replay: Bytes,
    stream: S,
}

impl<S> Link<S> {
    /// Wrap a stream with bytes that must be read back first
    pub fn new(replay: impl Into<Bytes>, stream: S) -> Self {
        Self {
            replay: replay.into(),
            stream,
        }
    }

    /// Wrap a stream that has nothing to replay
    pub fn fresh(stream: S) -> Self {
        Self::new(Bytes::new(), stream)
    }

    /// Bytes still pending replay
    pub fn replay(&self) -> &[u8] {
        &self.replay
    }

    /// Split into the pending replay bytes and the underlying stream
    pub fn into_parts(self) -> (Bytes, S) {
        (self.replay, self.stream)
    }
}

impl Link<TcpStream> {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Link<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.replay.has_remaining() {
            let n = self.replay.len().min(buf.remaining());
            buf.put_slice(&self.replay[..n]);
            self.replay.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Link<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Raw read/write helpers used by the sniffer and the relay
pub struct StreamUtils;

impl StreamUtils {
    /// Read until `buf` is full
    ///
    /// Progress is stored in `filled` as it happens, so a caller that drops
    /// this future (for example on a deadline) still knows exactly how many
    /// bytes were taken off the wire. Returns `UnexpectedEof` if the peer
    /// closes early.
    pub async fn read_full<R>(reader: &mut R, buf: &mut [u8], filled: &mut usize) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        while *filled < buf.len() {
            let n = reader.read(&mut buf[*filled..]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("peer closed after {} of {} bytes", *filled, buf.len()),
                ));
            }
            *filled += n;
        }
        Ok(())
    }

    /// Write all of `data` and flush
    pub async fn write_all<W>(writer: &mut W, data: &[u8]) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(data).await?;
        writer.flush().await
    }

    /// Copy from `reader` to `writer` until EOF or error
    pub async fn copy<R, W>(reader: &mut R, writer: &mut W) -> io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        tokio::io::copy(reader, writer).await
    }
}

/// Check if an error is just the peer going away
pub fn is_connection_closed_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
    )
}
