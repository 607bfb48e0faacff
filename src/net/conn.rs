use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio::time::Sleep;

/// Size of the per-connection read buffer.
pub const BUFFER_SIZE: usize = 1024;

/// Anything that can carry HTTP bytes: TCP, TLS, in-memory pipes.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Stream for T {}

/// A buffered connection. Reads go through the buffer, writes pass straight
/// to the [`Conn`].
pub type ConnIo = BufReader<Conn>;

/// Duplex stream with absolute read and write deadlines.
///
/// An expired deadline fails the pending operation with
/// `io::ErrorKind::TimedOut`, which the error layer maps to `Timeout`.
pub struct Conn {
    io: Box<dyn Stream>,
    remote_addr: Option<SocketAddr>,
    tls: bool,
    read_deadline: Option<Pin<Box<Sleep>>>,
    write_deadline: Option<Pin<Box<Sleep>>>,
}

impl Conn {
    pub fn new(io: impl Stream) -> Self {
        Self {
            io: Box::new(io),
            remote_addr: None,
            tls: false,
            read_deadline: None,
            write_deadline: None,
        }
    }

    pub fn with_remote_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.remote_addr = addr;
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn set_read_deadline(&mut self, at: Option<Instant>) {
        self.read_deadline = at.map(deadline);
    }

    pub fn set_write_deadline(&mut self, at: Option<Instant>) {
        self.write_deadline = at.map(deadline);
    }

    pub fn set_deadline(&mut self, at: Option<Instant>) {
        self.set_read_deadline(at);
        self.set_write_deadline(at);
    }

    /// Wraps the connection in a read buffer of [`BUFFER_SIZE`] bytes.
    pub fn buffered(self) -> ConnIo {
        BufReader::with_capacity(BUFFER_SIZE, self)
    }

    pub fn into_inner(self) -> Box<dyn Stream> {
        self.io
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("remote_addr", &self.remote_addr)
            .field("tls", &self.tls)
            .finish()
    }
}

fn deadline(at: Instant) -> Pin<Box<Sleep>> {
    Box::pin(tokio::time::sleep_until(tokio::time::Instant::from_std(at)))
}

fn expired(slot: &mut Option<Pin<Box<Sleep>>>, cx: &mut Context<'_>, what: &str) -> Option<io::Error> {
    let sleep = slot.as_mut()?;
    match sleep.as_mut().poll(cx) {
        Poll::Ready(()) => Some(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{what} deadline exceeded"),
        )),
        Poll::Pending => None,
    }
}

impl AsyncRead for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(err) = expired(&mut this.read_deadline, cx, "read") {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Some(err) = expired(&mut this.write_deadline, cx, "write") {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(err) = expired(&mut this.write_deadline, cx, "write") {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}
