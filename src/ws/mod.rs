//! WebSocket (RFC 6455) on top of the HTTP stack.
//!
//! The server side upgrades a request with an [`Upgrader`]; the client side
//! dials with a [`Dialer`]. Both end up with a [`WsConn`].

pub mod conn;
pub mod deflate;
pub mod dialer;
pub mod frame;
pub mod upgrade;

pub use conn::{MessageReader, Role, WsConn, WsOptions};
pub use dialer::Dialer;
pub use frame::{FrameHeader, OpCode};
pub use upgrade::Upgrader;

use base64::Engine;
use sha1::{Digest, Sha1};

const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub(crate) const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

/// `Sec-WebSocket-Accept` value for a `Sec-WebSocket-Key`.
pub fn accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.as_bytes());
    sha.update(ACCEPT_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(sha.finalize())
}

/// Comma-separated header list, trimmed, empty entries dropped.
pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// True when an extensions list names `permessage-deflate`, with or
/// without parameters.
pub(crate) fn offers_deflate(extensions: &str) -> bool {
    split_list(extensions).iter().any(|ext| {
        ext.split(';')
            .next()
            .is_some_and(|name| name.trim().eq_ignore_ascii_case(PERMESSAGE_DEFLATE))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc_6455_accept_key() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn deflate_offers() {
        assert!(offers_deflate("permessage-deflate; client_max_window_bits"));
        assert!(offers_deflate("x-webkit-deflate-frame, permessage-deflate"));
        assert!(!offers_deflate("x-webkit-deflate-frame"));
        assert!(!offers_deflate(""));
    }
}
