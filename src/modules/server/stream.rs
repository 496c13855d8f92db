//! Transport-agnostic byte streams.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;

/// A bidirectional byte stream: plain TCP or TLS over TCP.
///
/// Handlers work on `Box<dyn ByteStream>`, so the transport only matters
/// where the stream is constructed.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed stream handed to connection handlers.
pub type BoxedStream = Box<dyn ByteStream>;

/// Stream wrapper remembering when bytes last arrived from the peer.
#[derive(Debug)]
pub struct ActivityStream<S> {
    inner: S,
    last_read: Instant,
}

impl<S> ActivityStream<S> {
    /// Wrap `inner`; the read clock starts now.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            last_read: Instant::now(),
        }
    }

    /// When the last non-empty read completed.
    #[must_use]
    pub fn last_read(&self) -> Instant {
        self.last_read
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ActivityStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            this.last_read = Instant::now();
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ActivityStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_boxed_duplex() {
        let (client, server) = duplex(64);
        let mut client: BoxedStream = Box::new(client);
        let mut server: BoxedStream = Box::new(server);

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_activity_stream_tracks_reads_only() {
        let (client, server) = duplex(64);
        let mut client: BoxedStream = Box::new(client);
        let mut server = ActivityStream::new(Box::new(server) as BoxedStream);
        let opened = server.last_read();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        server.write_all(b"out").await.unwrap();
        assert_eq!(server.last_read(), opened);

        client.write_all(b"in").await.unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).await.unwrap();
        assert!(server.last_read() >= opened + std::time::Duration::from_millis(20));
    }
}
