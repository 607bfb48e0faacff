use crate::error::{Error, Part, Result};
use crate::http::header::Header;

/// How a message body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Framing {
    pub chunked: bool,
    /// `Content-Length`, or 0 when absent or chunked.
    pub length: u64,
    /// True when a `Content-Length` field was present.
    pub has_length: bool,
}

/// Picks body framing from `Transfer-Encoding` and `Content-Length`.
///
/// `Transfer-Encoding: chunked` wins over any `Content-Length`. Any other
/// transfer coding is refused.
pub fn framing(header: &Header) -> Result<Framing> {
    if let Some(te) = header.get("Transfer-Encoding") {
        if te.trim().eq_ignore_ascii_case("chunked") {
            return Ok(Framing {
                chunked: true,
                ..Framing::default()
            });
        }
        return Err(Error::UnknownTransferEncoding(te.to_string()));
    }
    match header.get("Content-Length") {
        Some(raw) => {
            let length = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| Error::invalid(Part::ContentLength, format!("{raw:?}")))?;
            Ok(Framing {
                chunked: false,
                length,
                has_length: true,
            })
        }
        None => Ok(Framing::default()),
    }
}
