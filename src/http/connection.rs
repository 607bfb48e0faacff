//! Per-connection request/response loop.
//!
//! ```text
//!   Idle ──bytes──▶ Reading ──head ok──▶ handler ──▶ Writing
//!    ▲                 │                               │
//!    │              bad head                           ├─ keep-alive ──▶ Idle
//!    │                 ▼                               ├─ hijack ──────▶ Hijacked
//!    └──────────── Closed ◀────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::time::{Instant, SystemTime};

use bytes::BytesMut;
use futures_util::FutureExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use url::Url;

use crate::context::Context;
use crate::error::{Error, Limit, Part, Result};
use crate::http::body::BodyReader;
use crate::http::encoding::{encode_all, ContentEncoding};
use crate::http::framing::{framing, Framing};
use crate::http::header::Header;
use crate::http::line::read_line;
use crate::http::parser::{parse_request_line, read_header};
use crate::http::request::{HijackFn, Method, Request, Version};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{encode_response_head, BodySink};
use crate::net::{Conn, ConnIo};
use crate::server::Server;

pub enum ConnectionState {
    /// Waiting for the first byte of the next request.
    Idle,
    Reading,
    Hijacked(HijackFn),
    Closed,
}

/// What the server learned from a request head.
struct Head {
    version: Version,
    method: Method,
    url: Url,
    header: Header,
    keep_alive: bool,
    expect_continue: bool,
    accept: Option<ContentEncoding>,
    framing: Framing,
    content_encoding: Option<ContentEncoding>,
}

/// A request head that could not be served, and the status to answer with.
struct Rejected {
    status: StatusCode,
    err: Error,
}

impl Rejected {
    fn new(status: StatusCode, err: Error) -> Self {
        Self { status, err }
    }
}

/// Maps a head parsing failure to the status sent back. `None` means the
/// peer went away and nothing should be written.
fn status_for(err: &Error) -> Option<StatusCode> {
    match err.root() {
        Error::TooLarge(Limit::RequestLine) => Some(StatusCode::URI_TOO_LONG),
        Error::TooLarge(Limit::Body) => Some(StatusCode::PAYLOAD_TOO_LARGE),
        Error::TooLarge(_) => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
        Error::InvalidFormat { part: Part::Method, .. } => Some(StatusCode::METHOD_NOT_ALLOWED),
        Error::InvalidFormat { part: Part::Url, .. } => Some(StatusCode::MISDIRECTED_REQUEST),
        Error::InvalidFormat { part: Part::Version, .. } => Some(StatusCode::UNPROCESSABLE_ENTITY),
        Error::InvalidFormat { .. } => Some(StatusCode::BAD_REQUEST),
        Error::UnknownTransferEncoding(_) => Some(StatusCode::NOT_IMPLEMENTED),
        Error::UnknownContentEncoding(_) => Some(StatusCode::UNSUPPORTED_MEDIA_TYPE),
        _ => None,
    }
}

pub struct Connection {
    io: ConnIo,
    remote_addr: Option<SocketAddr>,
    tls: bool,
    server: Server,
    ctx: Context,
    state: ConnectionState,
    served: u64,
}

impl Connection {
    pub fn new(conn: Conn, server: Server, ctx: Context) -> Self {
        let remote_addr = conn.remote_addr();
        let tls = conn.is_tls();
        Self {
            io: conn.buffered(),
            remote_addr,
            tls,
            server,
            ctx,
            state: ConnectionState::Reading,
            served: 0,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        tracing::debug!(peer = ?self.remote_addr, tls = self.tls, "connection open");
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Idle => {
                    self.state = if self.wait_for_request().await {
                        ConnectionState::Reading
                    } else {
                        ConnectionState::Closed
                    };
                }
                ConnectionState::Reading => {
                    self.state = self.serve_one().await?;
                    self.served += 1;
                }
                ConnectionState::Hijacked(hijack) => {
                    tracing::debug!(peer = ?self.remote_addr, "connection hijacked");
                    self.io.get_mut().set_deadline(None);
                    hijack(self.io).await;
                    return Ok(());
                }
                ConnectionState::Closed => break,
            }
        }
        let _ = self.io.get_mut().shutdown().await;
        tracing::debug!(peer = ?self.remote_addr, served = self.served, "connection closed");
        Ok(())
    }

    /// Waits for the next request's first byte under the idle timeout.
    /// False means the peer left, the wait timed out or the server is
    /// shutting down.
    async fn wait_for_request(&mut self) -> bool {
        let cfg = &self.server.config;
        let wait = cfg.idle_timeout.or(cfg.read_timeout);
        let conn = self.io.get_mut();
        conn.set_read_deadline(wait.map(|t| Instant::now() + t));

        let io = &mut self.io;
        let ready = self
            .ctx
            .run(async move { io.fill_buf().await.map(|b| !b.is_empty()) })
            .await;
        matches!(ready, Ok(true))
    }

    async fn serve_one(&mut self) -> Result<ConnectionState> {
        let cfg = self.server.config.clone();
        let now = Instant::now();
        let conn = self.io.get_mut();
        conn.set_read_deadline(cfg.read_timeout.map(|t| now + t));
        conn.set_write_deadline(cfg.write_timeout.map(|t| now + t));

        let head = match self.read_head().await {
            Ok(head) => head,
            Err(rejected) => return self.reject(rejected).await,
        };
        tracing::debug!(
            peer = ?self.remote_addr,
            method = %head.method,
            path = head.url.path(),
            "request"
        );

        let body = BodyReader::new(&mut self.io, &head.framing, false)
            .with_decoder(head.content_encoding)
            .with_limit(cfg.max_body_size)
            .with_expect_continue(head.expect_continue);
        let mut req = Request {
            version: head.version,
            remote_addr: self.remote_addr,
            method: head.method,
            url: head.url,
            header: head.header,
            body,
            ctx: self.ctx.clone(),
            hijack: None,
        };

        let handler = self.server.handler.clone();
        let outcome = AssertUnwindSafe(handler.handle(&mut req)).catch_unwind().await;

        let hijack = req.hijack.take();
        let mut reusable = head.keep_alive && hijack.is_none();
        if req.body.continue_pending() {
            reusable = false;
        } else if hijack.is_none() {
            if let Err(err) = req.body.discard().await {
                tracing::debug!(peer = ?self.remote_addr, %err, "could not drain request body");
                reusable = false;
            }
        }
        drop(req);

        let resp = match outcome {
            Ok(Some(resp)) => resp,
            Ok(None) if hijack.is_some() => Response::new(StatusCode::OK),
            Ok(None) => Response::new(StatusCode::NO_CONTENT),
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                tracing::error!(peer = ?self.remote_addr, panic = %msg, "handler panicked");
                reusable = false;
                match &self.server.error_handler {
                    Some(on_error) => on_error(&msg),
                    None => Response::internal_error(),
                }
            }
        };

        let reusable = self
            .write_response(head.version, head.method, resp, head.accept, head.framing.chunked, reusable)
            .await?;

        Ok(match hijack {
            Some(f) => ConnectionState::Hijacked(f),
            None if reusable => ConnectionState::Idle,
            None => ConnectionState::Closed,
        })
    }

    async fn read_head(&mut self) -> std::result::Result<Head, Option<Rejected>> {
        let cfg = self.server.config.clone();
        let (line_limit, head_limit) = (cfg.read_line_max_length, cfg.head_max_length);
        let io = &mut self.io;
        let read = self
            .ctx
            .run(async move {
                let line = read_line(io, line_limit, Limit::RequestLine).await?;
                let request_line = parse_request_line(&line)?;
                if request_line.is_h2_preface() {
                    return Ok((request_line, Header::new()));
                }
                let header = read_header(io, line_limit, head_limit).await?;
                Ok::<_, Error>((request_line, header))
            })
            .await;

        let (request_line, header) = read.map_err(|err| {
            status_for(&err).map(|status| Rejected::new(status, err))
        })?;
        if request_line.is_h2_preface() {
            return Err(Some(Rejected::new(
                StatusCode::HTTP_VERSION_NOT_SUPPORTED,
                Error::invalid(Part::Version, "HTTP/2 preface on an HTTP/1 connection"),
            )));
        }
        let reject = |err: Error| status_for(&err).map(|status| Rejected::new(status, err));

        let method = Method::from_str(&request_line.method).ok_or_else(|| {
            reject(Error::invalid(Part::Method, format!("unknown method {:?}", request_line.method)))
        })?;
        let url = self.request_url(&request_line.target, &header).map_err(reject)?;

        let version = request_line.version;
        // HTTP/1.1 stays open unless told to close; HTTP/1.0 only on request.
        let keep_alive = !self.server.config.disable_keep_alive
            && match version {
                Version::Http10 => header.has_token("Connection", "keep-alive"),
                _ => !header.has_token("Connection", "close"),
            };

        let mut expect_continue = false;
        if let Some(expect) = header.get("Expect") {
            if expect.eq_ignore_ascii_case("100-continue") {
                expect_continue = version == Version::Http11;
            } else {
                return Err(Some(Rejected::new(
                    StatusCode::EXPECTATION_FAILED,
                    Error::invalid(Part::Header, format!("unsupported expectation {expect:?}")),
                )));
            }
        }

        let accept = header.get("Accept-Encoding").and_then(ContentEncoding::negotiate);

        let mut body_framing = Framing::default();
        let mut content_encoding = None;
        if method.is_postable() {
            body_framing = framing(&header).map_err(reject)?;
            if !body_framing.chunked && body_framing.length > cfg.max_body_size {
                return Err(Some(Rejected::new(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    Error::TooLarge(Limit::Body),
                )));
            }
            content_encoding =
                ContentEncoding::parse_header(header.get("Content-Encoding")).map_err(reject)?;
        }

        Ok(Head {
            version,
            method,
            url,
            header,
            keep_alive,
            expect_continue,
            accept,
            framing: body_framing,
            content_encoding,
        })
    }

    /// Absolute URL of the request: origin-form targets are resolved
    /// against the `Host` header.
    fn request_url(&self, target: &str, header: &Header) -> Result<Url> {
        let scheme = if self.tls { "https" } else { "http" };
        if target.starts_with('/') || target == "*" {
            let host = header.get("Host").filter(|h| !h.is_empty()).unwrap_or("localhost");
            let base = Url::parse(&format!("{scheme}://{host}/"))
                .map_err(|e| Error::invalid(Part::Url, format!("bad host {host:?}: {e}")))?;
            let path = if target == "*" { "/" } else { target };
            return base
                .join(path)
                .map_err(|e| Error::invalid(Part::Url, format!("bad target {target:?}: {e}")));
        }
        Url::parse(target).map_err(|e| Error::invalid(Part::Url, format!("bad target {target:?}: {e}")))
    }

    /// Answers an unservable head with a canned response and closes.
    async fn reject(&mut self, rejected: Option<Rejected>) -> Result<ConnectionState> {
        let Some(Rejected { status, err }) = rejected else {
            return Ok(ConnectionState::Closed);
        };
        tracing::debug!(peer = ?self.remote_addr, %err, status = status.as_u16(), "rejecting request");
        let resp = Response::error(status);
        self.write_response(Version::Http11, Method::GET, resp, None, false, false)
            .await?;
        Ok(ConnectionState::Closed)
    }

    /// Writes a response. Returns whether the connection can carry another
    /// request.
    ///
    /// The body goes out chunked when the request was chunked or the handler
    /// asked for it; a chunked reply never carries `Content-Length`.
    async fn write_response(
        &mut self,
        version: Version,
        method: Method,
        mut resp: Response,
        accept: Option<ContentEncoding>,
        req_chunked: bool,
        keep_alive: bool,
    ) -> Result<bool> {
        let cfg = self.server.config.clone();
        resp.header.set_raw("Server", cfg.server_name.as_str());
        resp.header.set_raw("Date", httpdate::fmt_http_date(SystemTime::now()));

        let head_only = method == Method::HEAD;
        let replyable = resp.status.is_replyable();
        let mut body = if replyable { resp.body.take() } else { None };
        let mut reusable = keep_alive && replyable && body.is_some();

        let mut chunked = false;
        let mut advertised = None;
        let mut encoder = None;
        let mut buffered: Option<Vec<u8>> = None;

        if let Some(writer) = body.as_mut() {
            let handler_chunked = resp
                .header
                .get("Transfer-Encoding")
                .is_some_and(|te| te.eq_ignore_ascii_case("chunked"));
            chunked = version == Version::Http11 && (req_chunked || handler_chunked);
            let mut length = writer.content_length();
            let selected = accept.filter(|_| !head_only && !resp.header.contains("Content-Encoding"));

            if let Some(enc) = selected {
                if chunked || (length.is_none() && version == Version::Http11) {
                    chunked = true;
                    encoder = Some(enc.encoder());
                    resp.header.set_raw("Content-Encoding", enc.as_str());
                } else if length.is_some_and(|n| n <= cfg.max_encoding_size) {
                    let mut raw = Vec::new();
                    {
                        let mut sink = BodySink::new(&mut raw, false, None).with_length(length);
                        writer.write_body(&mut sink).await?;
                        sink.close().await?;
                    }
                    let compressed = encode_all(enc, &raw)?;
                    length = Some(compressed.len() as u64);
                    buffered = Some(compressed);
                    resp.header.set_raw("Content-Encoding", enc.as_str());
                }
            }

            if !chunked && length.is_none() {
                if version == Version::Http11 {
                    chunked = true;
                } else {
                    reusable = false;
                }
            }
            if chunked {
                resp.header.set_raw("Transfer-Encoding", "chunked");
                resp.header.remove("Content-Length");
            } else {
                resp.header.remove("Transfer-Encoding");
                if let Some(n) = length {
                    resp.header.set_raw("Content-Length", n.to_string());
                }
                advertised = length;
            }
        } else {
            resp.header.remove("Transfer-Encoding");
            if replyable {
                resp.header.set_raw("Content-Length", "0");
            }
        }

        if !resp.header.contains("Connection") {
            if !reusable {
                resp.header.set_raw("Connection", "close");
            } else if version == Version::Http10 {
                resp.header.set_raw("Connection", "keep-alive");
            }
        }

        let reply_version = if version == Version::Http10 { Version::Http10 } else { Version::Http11 };
        let mut head = BytesMut::with_capacity(256);
        encode_response_head(&mut head, reply_version, resp.status, &resp.header);
        let conn = self.io.get_mut();
        conn.write_all(&head).await?;

        match body {
            Some(mut writer) if !head_only => {
                let mut sink = BodySink::new(conn, chunked, encoder).with_length(advertised);
                let res = match buffered {
                    Some(bytes) => sink.write(&bytes).await,
                    None => writer.write_body(&mut sink).await,
                };
                let closed = sink.close().await;
                if let Err(err) = res.and(closed) {
                    tracing::debug!(peer = ?self.remote_addr, %err, "response body failed");
                    reusable = false;
                }
            }
            _ => conn.flush().await?,
        }

        tracing::debug!(
            peer = ?self.remote_addr,
            status = resp.status.as_u16(),
            reusable,
            "response written"
        );
        Ok(reusable)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
