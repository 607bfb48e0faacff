//! Single-exchange HTTP/1.1 client.
//!
//! One [`RoundTripper::round_trip`] call dials (directly, through a
//! forwarding proxy, a `CONNECT` tunnel or SOCKS5), optionally wraps the
//! stream in TLS, writes one request and reads one response head. The body
//! reader owns the connection; every exchange uses a fresh connection and
//! asks the server to close it.

use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;
use url::Url;

use crate::client::request::ClientRequest;
use crate::client::response::ClientResponse;
use crate::config::TransportConfig;
use crate::context::Context;
use crate::error::{Error, Limit, Op, Part, Result, ResultExt};
use crate::http::body::BodyReader;
use crate::http::encoding::ContentEncoding;
use crate::http::framing::framing;
use crate::http::header::Header;
use crate::http::line::read_line;
use crate::http::parser::{parse_status_line, read_header, StatusLine};
use crate::http::request::Method;
use crate::http::response::StatusCode;
use crate::http::writer::{encode_request_head, BodySink, BodyWriter};
use crate::net::{tls, Conn, ConnIo, Dialer, TcpDialer};
use crate::proxy::{self, connect, join_host_port, socks5, Proxy, ProxyFn, ProxyKind};

/// Where and how one exchange connects.
struct Route {
    scheme: String,
    host: String,
    port: u16,
    default_port: u16,
    proxy: Option<Proxy>,
}

impl Route {
    fn addr(&self) -> String {
        join_host_port(&self.host, self.port)
    }

    /// `Host` value. A forwarding proxy gets `scheme://host:port`; otherwise
    /// the port is left out when it is the scheme's default.
    fn host_header(&self) -> String {
        if self.absolute_target() {
            format!("{}://{}", self.scheme, self.addr())
        } else if self.port == self.default_port {
            self.host.clone()
        } else {
            self.addr()
        }
    }

    fn absolute_target(&self) -> bool {
        self.proxy.as_ref().is_some_and(|p| p.forwards_plaintext(&self.scheme))
    }

    /// Host name for TLS and SOCKS, without IPv6 brackets.
    fn bare_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}

pub struct RoundTripper {
    config: TransportConfig,
    dialer: Arc<dyn Dialer>,
    proxy: Option<ProxyFn>,
    connector: TlsConnector,
}

impl RoundTripper {
    /// Round tripper with the default TCP dialer and the webpki root set.
    /// A static `proxy` in `config` is installed as the proxy function.
    pub fn new(config: TransportConfig) -> Result<Self> {
        let proxy = match config.proxy.as_deref() {
            Some(raw) if !raw.is_empty() => {
                let url = Url::parse(raw)
                    .map_err(|e| Error::invalid(Part::Url, format!("proxy {raw:?}: {e}")))?;
                Proxy::parse(&url)?;
                Some(proxy::fixed(url))
            }
            _ => None,
        };
        Ok(Self {
            config,
            dialer: Arc::new(TcpDialer::default()),
            proxy,
            connector: TlsConnector::from(tls::default_client_config()?),
        })
    }

    pub fn with_dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.dialer = Arc::new(dialer);
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyFn) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_tls_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.connector = TlsConnector::from(config);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Sends `req` and reads the response head.
    ///
    /// The request body is consumed. If `ctx` carries a transport hijacker
    /// the connection is parked there and the response has no body.
    pub async fn round_trip(&self, ctx: &Context, req: &mut ClientRequest) -> Result<ClientResponse> {
        let route = self.route(req)?;
        let mut body = req.body.take();
        let chunked = self.prepare_header(req, &route, body.as_deref());

        let conn = self.dial(ctx, &route).await?;
        let conn = if route.scheme == "https" {
            tls::client_handshake(ctx, conn, &self.connector, route.bare_host(), self.config.tls_handshake_timeout)
                .await?
        } else {
            conn
        };
        let mut io = conn.buffered();

        let target = if req.method == Method::CONNECT {
            route.addr()
        } else {
            req.target(route.absolute_target())
        };
        let mut head = BytesMut::with_capacity(256);
        encode_request_head(&mut head, req.method, &target, &req.header);
        let expect_continue = body.is_some()
            && req
                .header
                .get("Expect")
                .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));

        let now = Instant::now();
        io.get_mut().set_write_deadline(self.config.write_timeout.map(|t| now + t));
        io.get_mut().set_read_deadline(self.config.read_timeout.map(|t| now + t));

        {
            let conn = io.get_mut();
            let body = if expect_continue { None } else { body.as_mut() };
            ctx.run(async move {
                conn.write_all(&head).await?;
                match body {
                    Some(body) => send_body(conn, body.as_mut(), chunked).await,
                    None => conn.flush().await.map_err(Error::from),
                }
            })
            .await
            .op(Op::Write)?;
        }

        let (mut status, mut header) = self.read_head(ctx, &mut io, expect_continue).await?;
        if expect_continue {
            if status.status == 100 {
                if let Some(body) = body.as_mut() {
                    let conn = io.get_mut();
                    ctx.run(send_body(conn, body.as_mut(), chunked)).await.op(Op::Write)?;
                }
                (status, header) = self.read_head(ctx, &mut io, false).await?;
            } else {
                tracing::debug!(status = status.status, "server declined the request body");
            }
        }
        io.get_mut().set_write_deadline(None);

        let code = StatusCode::new(status.status);
        tracing::debug!(
            method = %req.method,
            url = %req.url,
            status = status.status,
            "response head"
        );

        if let Some(hijacker) = ctx.hijacker() {
            io.get_mut().set_deadline(None);
            hijacker.put(io);
            return Ok(ClientResponse {
                version: status.version,
                status: code,
                reason: status.reason,
                header,
                body: None,
            });
        }

        let has_body = req.method != Method::HEAD && code.is_replyable();
        let body = if has_body {
            Some(self.mount_body(io, &mut header)?)
        } else {
            let _ = io.get_mut().shutdown().await;
            None
        };

        Ok(ClientResponse {
            version: status.version,
            status: code,
            reason: status.reason,
            header,
            body,
        })
    }

    fn route(&self, req: &ClientRequest) -> Result<Route> {
        let scheme = req.url.scheme().to_string();
        let default_port = match scheme.as_str() {
            "http" => 80,
            "https" => 443,
            other => {
                return Err(Error::invalid(Part::Url, format!("unsupported scheme {other:?}")));
            }
        };
        let host = req
            .url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::invalid(Part::Url, format!("{} has no host", req.url)))?
            .to_string();
        let port = req.url.port().unwrap_or(default_port);
        let proxy = match &self.proxy {
            Some(select) => select(&req.url).map(|url| Proxy::parse(&url)).transpose()?,
            None => None,
        };
        Ok(Route {
            scheme,
            host,
            port,
            default_port,
            proxy,
        })
    }

    /// Fills the stack-controlled and default fields. Returns whether the
    /// body goes out chunked.
    fn prepare_header(&self, req: &mut ClientRequest, route: &Route, body: Option<&dyn BodyWriter>) -> bool {
        let header = &mut req.header;
        header.set_raw("Host", route.host_header());
        header.set_default("Accept", "*/*");
        if req.method != Method::HEAD && !header.contains("Range") {
            header.set_default("Accept-Encoding", "gzip, deflate, br");
        }
        if let Some(creds) = proxy::userinfo(&req.url) {
            header.set_default("Authorization", creds.basic());
        }
        if route.absolute_target() {
            if let Some(creds) = route.proxy.as_ref().and_then(|p| p.credentials.as_ref()) {
                header.set_default("Proxy-Authorization", creds.basic());
            }
        }
        header.set_default("Connection", "close");

        let wants_chunked = header
            .get("Transfer-Encoding")
            .is_some_and(|te| te.eq_ignore_ascii_case("chunked"));
        match body.map(|b| b.content_length()) {
            Some(Some(n)) if !wants_chunked => {
                header.remove("Transfer-Encoding");
                header.set_raw("Content-Length", n.to_string());
                false
            }
            Some(_) => {
                header.remove("Content-Length");
                header.set_raw("Transfer-Encoding", "chunked");
                true
            }
            None => {
                header.remove("Transfer-Encoding");
                if req.method.is_postable() {
                    header.set_raw("Content-Length", "0");
                }
                false
            }
        }
    }

    async fn dial(&self, ctx: &Context, route: &Route) -> Result<Conn> {
        let Some(proxy) = &route.proxy else {
            return self.dialer.dial(ctx, &route.addr()).await;
        };
        let ctx = ctx.with_optional_timeout(self.config.proxy_dial_timeout);
        self.dial_proxy(&ctx, proxy, route)
            .await
            .map_err(|e| Error::op(Op::Proxy, e))
    }

    async fn dial_proxy(&self, ctx: &Context, proxy: &Proxy, route: &Route) -> Result<Conn> {
        tracing::debug!(proxy = %proxy.addr(), target = %route.addr(), kind = ?proxy.kind, "dialing through proxy");
        let conn = self.dialer.dial(ctx, &proxy.addr()).await?;
        match proxy.kind {
            ProxyKind::Http if route.absolute_target() => Ok(conn),
            ProxyKind::Http => connect::connect_tunnel(ctx, conn, &route.addr(), proxy.credentials.as_ref()).await,
            ProxyKind::Https => {
                let host = proxy.host.trim_start_matches('[').trim_end_matches(']');
                let conn = tls::client_handshake(ctx, conn, &self.connector, host, self.config.tls_handshake_timeout)
                    .await?;
                connect::connect_tunnel(ctx, conn, &route.addr(), proxy.credentials.as_ref()).await
            }
            ProxyKind::Socks5 => {
                let mut conn = conn;
                socks5::handshake(ctx, &mut conn, route.bare_host(), route.port, proxy.credentials.as_ref())
                    .await?;
                Ok(conn)
            }
        }
    }

    /// Reads a status line and header block. Interim `1xx` responses other
    /// than `101` are skipped, except a `100` when `want_continue` is set.
    async fn read_head(&self, ctx: &Context, io: &mut ConnIo, want_continue: bool) -> Result<(StatusLine, Header)> {
        let (line_limit, head_limit) = (self.config.read_line_max_length, self.config.head_max_length);
        loop {
            let (status, header) = ctx
                .run(async {
                    let line = read_line(&mut *io, line_limit, Limit::Line).await?;
                    let status = parse_status_line(&line)?;
                    let header = read_header(&mut *io, line_limit, head_limit).await?;
                    Ok::<_, Error>((status, header))
                })
                .await
                .op(Op::Read)?;
            let interim = (100..200).contains(&status.status) && status.status != 101;
            if interim && !(want_continue && status.status == 100) {
                tracing::trace!(status = status.status, "skipping interim response");
                continue;
            }
            return Ok((status, header));
        }
    }

    fn mount_body(&self, io: ConnIo, header: &mut Header) -> Result<BodyReader<ConnIo>> {
        let encoding = ContentEncoding::parse_header(header.get("Content-Encoding")).op(Op::Read)?;
        let fr = framing(header).op(Op::Read)?;
        if !fr.chunked && fr.length > self.config.max_body_size {
            return Err(Error::op(Op::Read, Error::TooLarge(Limit::Body)));
        }
        if encoding.is_some() {
            header.remove("Content-Encoding");
            header.remove("Content-Length");
        }
        Ok(BodyReader::new(io, &fr, true)
            .with_decoder(encoding)
            .with_limit(self.config.max_body_size))
    }
}

async fn send_body(conn: &mut Conn, body: &mut dyn BodyWriter, chunked: bool) -> Result<()> {
    let length = if chunked { None } else { body.content_length() };
    let mut sink = BodySink::new(conn, chunked, None).with_length(length);
    let res = body.write_body(&mut sink).await;
    let closed = sink.close().await;
    res?;
    closed
}
