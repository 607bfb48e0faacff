use std::time::Duration;

use futures_util::future::BoxFuture;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

use crate::context::Context;
use crate::error::{Error, Op, Result};
use crate::net::Conn;

/// Opens byte streams to `host:port` addresses.
pub trait Dialer: Send + Sync {
    fn dial<'a>(&'a self, ctx: &'a Context, addr: &'a str) -> BoxFuture<'a, Result<Conn>>;
}

/// Plain TCP dialer.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    pub connect_timeout: Option<Duration>,
    pub keep_alive: Option<Duration>,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(30)),
            keep_alive: Some(Duration::from_secs(10)),
        }
    }
}

impl TcpDialer {
    async fn connect(&self, ctx: &Context, addr: &str) -> Result<Conn> {
        let ctx = ctx.with_optional_timeout(self.connect_timeout);
        let stream = ctx.run(TcpStream::connect(addr)).await?;
        stream.set_nodelay(true)?;
        if let Some(idle) = self.keep_alive {
            let keepalive = TcpKeepalive::new().with_time(idle);
            SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
        }
        let peer = stream.peer_addr().ok();
        tracing::trace!(addr, peer = ?peer, "dialed");
        Ok(Conn::new(stream).with_remote_addr(peer))
    }
}

impl Dialer for TcpDialer {
    fn dial<'a>(&'a self, ctx: &'a Context, addr: &'a str) -> BoxFuture<'a, Result<Conn>> {
        Box::pin(async move { self.connect(ctx, addr).await.map_err(|e| Error::op(Op::Dial, e)) })
    }
}
