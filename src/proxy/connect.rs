//! HTTP `CONNECT` tunnels.

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;

use crate::context::Context;
use crate::error::{Error, Limit, Op, Part, Result};
use crate::http::header::{CookieStyle, Header};
use crate::http::line::read_line;
use crate::http::parser::{parse_status_line, read_header};
use crate::net::{Conn, Rewind};
use crate::proxy::Credentials;

/// Header budget for the proxy's answer to `CONNECT`.
const RESPONSE_BUDGET: usize = 4096;

/// Asks the proxy on `conn` to open a tunnel to `target` (`host:port`).
///
/// Returns the tunnelled connection. Bytes the proxy sent past its
/// response head are replayed ahead of the socket.
pub async fn connect_tunnel(
    ctx: &Context,
    conn: Conn,
    target: &str,
    credentials: Option<&Credentials>,
) -> Result<Conn> {
    tunnel(ctx, conn, target, credentials)
        .await
        .map_err(|e| Error::op(Op::Proxy, e))
}

async fn tunnel(ctx: &Context, conn: Conn, target: &str, credentials: Option<&Credentials>) -> Result<Conn> {
    let remote = conn.remote_addr();

    let mut header = Header::new();
    header.set("Host", target)?;
    if let Some(creds) = credentials {
        header.set("Proxy-Authorization", creds.basic())?;
    }
    let mut head = BytesMut::with_capacity(128);
    head.extend_from_slice(format!("CONNECT {target} HTTP/1.1\r\n").as_bytes());
    header.write_to(&mut head, CookieStyle::Request);
    head.extend_from_slice(b"\r\n");

    let mut io = conn.buffered();
    let status = ctx
        .run(async {
            io.get_mut().write_all(&head).await?;
            io.get_mut().flush().await?;
            let line = read_line(&mut io, RESPONSE_BUDGET, Limit::Line).await?;
            let status = parse_status_line(&line)?;
            read_header(&mut io, RESPONSE_BUDGET, RESPONSE_BUDGET).await?;
            Ok::<_, Error>(status)
        })
        .await?;

    if status.status != 200 {
        return Err(Error::invalid(
            Part::Status,
            format!("proxy refused CONNECT {target}: {} {}", status.status, status.reason),
        ));
    }
    tracing::debug!(target, "CONNECT tunnel established");

    let leftover = Bytes::copy_from_slice(io.buffer());
    let conn = io.into_inner();
    Ok(Conn::new(Rewind::new(leftover, conn)).with_remote_addr(remote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

    #[tokio::test]
    async fn tunnel_replays_early_bytes() {
        let (client, server) = tokio::io::duplex(1024);
        let proxy = tokio::spawn(async move {
            let mut server = BufReader::new(server);
            let mut head = String::new();
            loop {
                let mut line = String::new();
                server.read_line(&mut line).await.unwrap();
                if line == "\r\n" {
                    break;
                }
                head.push_str(&line);
            }
            server
                .get_mut()
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\nearly")
                .await
                .unwrap();
            head
        });

        let creds = Credentials { username: "u".into(), password: "p".into() };
        let mut conn = connect_tunnel(&Context::new(), Conn::new(client), "example.com:443", Some(&creds))
            .await
            .unwrap();
        let head = proxy.await.unwrap();
        assert!(head.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
        assert!(head.contains("Host: example.com:443\r\n"));
        assert!(head.contains("Proxy-Authorization: Basic dTpw\r\n"));

        let mut early = [0u8; 5];
        conn.read_exact(&mut early).await.unwrap();
        assert_eq!(&early, b"early");
    }

    #[tokio::test]
    async fn refused_tunnel_is_a_proxy_error() {
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let _ = server.read(&mut buf).await;
            let _ = server
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n")
                .await;
        });
        let err = connect_tunnel(&Context::new(), Conn::new(client), "example.com:443", None)
            .await
            .unwrap_err();
        assert_eq!(err.operation(), Some(Op::Proxy));
        assert!(err.to_string().contains("407"));
    }
}
