//! HTTP/1.x server: handler trait, per-server settings and connection
//! dispatch.
//!
//! ```ignore
//! use plow::server::{Handler, Server};
//!
//! let server = Server::new(ServerConfig::default(), Hello);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! server.serve(listener).await?;
//! ```

pub mod listener;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::context::Context;
use crate::error::Result;
use crate::http::connection::Connection;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::net::tls::{self, Accepted};
use crate::net::Conn;

/// Serves requests.
///
/// Returning `None` sends an empty `204 No Content` (or `200 OK` when the
/// request was hijacked).
pub trait Handler: Send + Sync + 'static {
    fn handle<'a, 'c>(&'a self, req: &'a mut Request<'c>) -> BoxFuture<'a, Option<Response>>;
}

/// Decides whether a freshly accepted peer is served.
pub type ConnFilter = Arc<dyn Fn(SocketAddr) -> bool + Send + Sync>;

/// Builds the response sent after a handler panicked.
pub type ErrorHandler = Arc<dyn Fn(&str) -> Response + Send + Sync>;

/// Takes over a TLS connection whose ALPN protocol it was registered for.
pub type AlpnHandler = Arc<dyn Fn(Conn) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone)]
pub struct Server {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) filter: Option<ConnFilter>,
    pub(crate) tls: Option<TlsAcceptor>,
    pub(crate) alpn: Arc<HashMap<String, AlpnHandler>>,
    pub(crate) error_handler: Option<ErrorHandler>,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(config: ServerConfig, handler: impl Handler) -> Self {
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
            filter: None,
            tls: None,
            alpn: Arc::new(HashMap::new()),
            error_handler: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn filter_conn(mut self, filter: impl Fn(SocketAddr) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Serves TLS. Plaintext requests hitting the TLS port are answered
    /// with a 400.
    pub fn tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Routes TLS connections that negotiated `protocol` to `handler`
    /// instead of the HTTP/1.x loop.
    pub fn alpn(mut self, protocol: impl Into<String>, handler: AlpnHandler) -> Self {
        Arc::make_mut(&mut self.alpn).insert(protocol.into(), handler);
        self
    }

    pub fn error_handler(mut self, handler: impl Fn(&str) -> Response + Send + Sync + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Stops the accept loop and cancels the context of live connections.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Accepts connections until [`Server::shutdown`], then fails with
    /// `Closed`.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        listener::run(self, listener).await
    }

    /// Serves one already-accepted connection to completion.
    pub async fn serve_conn(&self, conn: Conn) {
        let ctx = Context::from_token(self.shutdown.child_token());
        let peer = conn.remote_addr();

        let conn = match &self.tls {
            Some(acceptor) => {
                match tls::server_handshake(&ctx, conn, acceptor, self.config.tls_handshake_timeout).await {
                    Ok(Accepted::Plaintext) => {
                        tracing::debug!(peer = ?peer, "plaintext request on TLS listener");
                        return;
                    }
                    Ok(Accepted::Tls(conn, alpn)) => {
                        let handler = alpn.as_ref().and_then(|p| self.alpn.get(p));
                        if let Some(handler) = handler {
                            tracing::debug!(peer = ?peer, alpn = ?alpn, "dispatching to ALPN handler");
                            handler(conn).await;
                            return;
                        }
                        conn
                    }
                    Err(err) => {
                        tracing::warn!(peer = ?peer, %err, "TLS handshake failed");
                        return;
                    }
                }
            }
            None => conn,
        };

        if let Err(err) = Connection::new(conn, self.clone(), ctx).run().await {
            tracing::debug!(peer = ?peer, %err, "connection ended with error");
        }
    }
}
