//! Client side of the opening handshake.

use base64::Engine;
use url::Url;

use crate::client::{ClientRequest, ClientResponse, RoundTripper};
use crate::config::WsDialerConfig;
use crate::context::{Context, TransportHijacker};
use crate::error::{Error, Part, Result};
use crate::http::request::Method;
use crate::http::response::StatusCode;
use crate::ws::conn::{Role, WsConn, WsOptions};
use crate::ws::{accept_key, offers_deflate, PERMESSAGE_DEFLATE};

/// Opens WebSocket connections over a [`RoundTripper`], so proxies and TLS
/// settings apply to `ws://` and `wss://` URLs alike.
pub struct Dialer {
    config: WsDialerConfig,
    transport: RoundTripper,
}

fn handshake_error(detail: impl Into<String>) -> Error {
    Error::invalid(Part::Handshake, detail)
}

impl Dialer {
    pub fn new(config: WsDialerConfig, transport: RoundTripper) -> Self {
        Self { config, transport }
    }

    /// Dials `url` (`ws`, `wss`, `http` or `https`) and performs the
    /// upgrade. The handshake response comes back alongside the connection.
    pub async fn dial(&self, ctx: &Context, url: &str) -> Result<(WsConn, ClientResponse)> {
        let mut url = Url::parse(url).map_err(|e| Error::invalid(Part::Url, format!("{url:?}: {e}")))?;
        let scheme = match url.scheme() {
            "ws" | "http" => "http",
            "wss" | "https" => "https",
            other => return Err(Error::invalid(Part::Url, format!("unsupported scheme {other:?}"))),
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::invalid(Part::Url, "cannot rewrite scheme"))?;

        let key = base64::engine::general_purpose::STANDARD.encode(rand::random::<[u8; 16]>());
        let mut req = ClientRequest::from_url(Method::GET, url)
            .with_header("Upgrade", "websocket")?
            .with_header("Connection", "Upgrade")?
            .with_header("Sec-WebSocket-Version", "13")?
            .with_header("Sec-WebSocket-Key", key.as_str())?;
        if let Some(origin) = &self.config.origin {
            req.header.set("Origin", origin.as_str())?;
        }
        if !self.config.protocols.is_empty() {
            req.header.set("Sec-WebSocket-Protocol", self.config.protocols.join(", "))?;
        }
        if self.config.enable_compression {
            req.header.set("Sec-WebSocket-Extensions", PERMESSAGE_DEFLATE)?;
        }

        let hijacker = TransportHijacker::new();
        let hctx = ctx.with_hijacker(hijacker.clone());
        let resp = self.transport.round_trip(&hctx, &mut req).await?;
        let io = hijacker
            .take()
            .ok_or_else(|| handshake_error("connection was not handed over"))?;

        let compression = self.check(&resp, &key)?;
        let opts = WsOptions {
            compression,
            max_frame_size: self.config.max_frame_size,
            max_message_size: self.config.max_message_size,
            read_timeout: self.config.read_timeout,
            write_timeout: self.config.write_timeout,
        };
        tracing::debug!(url = %req.url, compression, "websocket connected");
        Ok((WsConn::new(io, Role::Client, opts), resp))
    }

    /// Validates the `101` answer. Returns whether compression is on.
    fn check(&self, resp: &ClientResponse, key: &str) -> Result<bool> {
        if resp.status != StatusCode::SWITCHING_PROTOCOLS {
            return Err(handshake_error(format!("unexpected status {}", resp.status.as_u16())));
        }
        let header = &resp.header;
        if !header.has_token("Upgrade", "websocket") {
            return Err(handshake_error("missing Upgrade: websocket"));
        }
        if !header.has_token("Connection", "upgrade") {
            return Err(handshake_error("missing Connection: upgrade"));
        }
        if header.get("Sec-WebSocket-Accept") != Some(accept_key(key).as_str()) {
            return Err(handshake_error("bad Sec-WebSocket-Accept"));
        }
        if let Some(protocol) = header.get("Sec-WebSocket-Protocol") {
            if !self.config.protocols.iter().any(|p| p == protocol) {
                return Err(handshake_error(format!("server chose unoffered protocol {protocol:?}")));
            }
        }
        match header.get("Sec-WebSocket-Extensions") {
            None | Some("") => Ok(false),
            Some(ext) if self.config.enable_compression && offers_deflate(ext) => Ok(true),
            Some(ext) => Err(handshake_error(format!("unrequested extension {ext:?}"))),
        }
    }
}
