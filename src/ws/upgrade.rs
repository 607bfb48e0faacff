//! Server side of the opening handshake.

use std::future::Future;
use std::sync::Arc;

use crate::config::UpgraderConfig;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::ws::conn::{Role, WsConn, WsOptions};
use crate::ws::{accept_key, offers_deflate, split_list, PERMESSAGE_DEFLATE};

/// Picks one of the client's offered sub-protocols. Returning `None` or an
/// empty string refuses the upgrade with a 501.
pub type ProtocolSelector = Arc<dyn Fn(&[String]) -> Option<String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Upgrader {
    config: UpgraderConfig,
    select_protocol: Option<ProtocolSelector>,
}

impl Upgrader {
    pub fn new(config: UpgraderConfig) -> Self {
        Self {
            config,
            select_protocol: None,
        }
    }

    pub fn with_protocol_selector(mut self, select: impl Fn(&[String]) -> Option<String> + Send + Sync + 'static) -> Self {
        self.select_protocol = Some(Arc::new(select));
        self
    }

    /// Validates the handshake in `req`. On success the request is
    /// hijacked: once the returned `101` is written, `on_conn` runs with the
    /// server-side [`WsConn`]. On failure the returned response explains
    /// why and nothing is hijacked.
    pub fn upgrade<F, Fut>(&self, req: &mut Request<'_>, on_conn: F) -> Response
    where
        F: FnOnce(WsConn) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let accepted = match self.negotiate(req) {
            Ok(accepted) => accepted,
            Err((status, reason)) => {
                tracing::debug!(status = status.as_u16(), reason, "websocket handshake refused");
                return Response::text(status, reason);
            }
        };

        let opts = WsOptions {
            compression: accepted.compression,
            max_frame_size: self.config.max_frame_size,
            max_message_size: self.config.max_message_size,
            read_timeout: self.config.read_timeout,
            write_timeout: self.config.write_timeout,
        };
        req.hijack(move |io| {
            Box::pin(async move {
                on_conn(WsConn::new(io, Role::Server, opts)).await;
            })
        });

        let mut resp = ResponseBuilder::new(StatusCode::SWITCHING_PROTOCOLS)
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Accept", accepted.accept);
        if let Some(protocol) = accepted.protocol {
            resp = resp.header("Sec-WebSocket-Protocol", protocol);
        }
        if accepted.compression {
            resp = resp.header("Sec-WebSocket-Extensions", PERMESSAGE_DEFLATE);
        }
        resp.build()
    }

    fn negotiate(&self, req: &Request<'_>) -> Result<Accepted, (StatusCode, &'static str)> {
        if req.method != Method::GET {
            return Err((StatusCode::METHOD_NOT_ALLOWED, "websocket: method must be GET"));
        }
        let header = &req.header;
        if !header.has_token("Connection", "upgrade") {
            return Err((StatusCode::BAD_REQUEST, "websocket: missing Connection: upgrade"));
        }
        if !header.has_token("Upgrade", "websocket") {
            return Err((StatusCode::BAD_REQUEST, "websocket: missing Upgrade: websocket"));
        }
        if header.get("Sec-WebSocket-Version") != Some("13") {
            return Err((StatusCode::BAD_REQUEST, "websocket: unsupported version"));
        }
        let key = header
            .get("Sec-WebSocket-Key")
            .filter(|k| !k.is_empty())
            .ok_or((StatusCode::BAD_REQUEST, "websocket: missing Sec-WebSocket-Key"))?;

        let offered = split_list(header.get("Sec-WebSocket-Protocol").unwrap_or(""));
        let protocol = if offered.is_empty() {
            None
        } else {
            let chosen = match &self.select_protocol {
                Some(select) => select(&offered),
                None => offered.first().cloned(),
            };
            match chosen {
                Some(p) if !p.is_empty() => Some(p),
                _ => return Err((StatusCode::NOT_IMPLEMENTED, "websocket: no acceptable sub-protocol")),
            }
        };

        let compression = self.config.enable_compression
            && offers_deflate(header.get("Sec-WebSocket-Extensions").unwrap_or(""));

        Ok(Accepted {
            accept: accept_key(key),
            protocol,
            compression,
        })
    }
}

struct Accepted {
    accept: String,
    protocol: Option<String>,
    compression: bool,
}
