//! TLS on top of [`Conn`], backed by rustls.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::rustls::{self, pki_types::ServerName};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::context::Context;
use crate::error::{Error, Op, Part, Result};
use crate::net::{Conn, Rewind};

/// Record prefixes of plaintext HTTP requests. A TLS server that sees one of
/// these instead of a handshake record answers in plaintext.
const HTTP_PREFIXES: [&[u8; 5]; 9] = [
    b"GET /", b"HEAD ", b"POST ", b"PUT /", b"OPTIO", b"DELET", b"CONNE", b"PATCH", b"TRACE",
];

pub const PLAINTEXT_ON_TLS_BODY: &str = "http: sent an HTTP request to an HTTPS server.";

pub fn looks_like_http(prefix: &[u8]) -> bool {
    HTTP_PREFIXES.iter().any(|p| prefix == &p[..])
}

/// Client configuration trusting the webpki root set.
pub fn default_client_config() -> Result<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::op(Op::Tls, Error::other(e.to_string())))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Runs the client side of the handshake, bounded by `timeout`.
pub async fn client_handshake(
    ctx: &Context,
    conn: Conn,
    connector: &TlsConnector,
    server_name: &str,
    timeout: Option<Duration>,
) -> Result<Conn> {
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|_| Error::op(Op::Tls, Error::invalid(Part::Url, format!("bad server name {server_name:?}"))))?;
    let remote = conn.remote_addr();
    let ctx = ctx.with_optional_timeout(timeout);
    let stream = ctx
        .run(connector.connect(name, conn))
        .await
        .map_err(|e| Error::op(Op::Tls, e))?;
    Ok(Conn::new(stream).with_remote_addr(remote).with_tls(true))
}

/// Outcome of the server side of a TLS accept.
pub enum Accepted {
    /// Handshake completed; carries the negotiated ALPN protocol.
    Tls(Conn, Option<String>),
    /// The peer spoke plaintext HTTP and has been answered with a 400.
    Plaintext,
}

/// Runs the server side of the handshake, bounded by `timeout`.
pub async fn server_handshake(
    ctx: &Context,
    mut conn: Conn,
    acceptor: &TlsAcceptor,
    timeout: Option<Duration>,
) -> Result<Accepted> {
    let ctx = ctx.with_optional_timeout(timeout);
    let remote = conn.remote_addr();

    let mut prefix = [0u8; 5];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = ctx
            .run(conn.read(&mut prefix[filled..]))
            .await
            .map_err(|e| Error::op(Op::Tls, e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    if filled == prefix.len() && looks_like_http(&prefix) {
        let reply = format!(
            "HTTP/1.0 400 Bad Request\r\nConnection: close\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
            PLAINTEXT_ON_TLS_BODY.len(),
            PLAINTEXT_ON_TLS_BODY
        );
        ctx.run(conn.write_all(reply.as_bytes()))
            .await
            .map_err(|e| Error::op(Op::Tls, e))?;
        let _ = conn.shutdown().await;
        return Ok(Accepted::Plaintext);
    }

    let rewound = Rewind::new(Bytes::copy_from_slice(&prefix[..filled]), conn);
    let stream = ctx
        .run(acceptor.accept(rewound))
        .await
        .map_err(|e| Error::op(Op::Tls, e))?;
    let alpn = stream
        .get_ref()
        .1
        .alpn_protocol()
        .map(|p| String::from_utf8_lossy(p).into_owned());
    Ok(Accepted::Tls(
        Conn::new(stream).with_remote_addr(remote).with_tls(true),
        alpn,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_plaintext_methods() {
        assert!(looks_like_http(b"GET /"));
        assert!(looks_like_http(b"CONNE"));
        assert!(!looks_like_http(b"GET x"));
        assert!(!looks_like_http(&[0x16, 0x03, 0x01, 0x00, 0xa5]));
    }

    #[test]
    fn builds_client_config() {
        let cfg = default_client_config().unwrap();
        assert!(cfg.alpn_protocols.is_empty());
    }
}
