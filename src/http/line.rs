//! Bounded line reads and header-name normalization.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{unexpected_eof, Error, Limit, Result};

/// Reads one CRLF- (or bare LF-) terminated line and returns it without the
/// terminator.
///
/// Fails with `TooLarge(limit_kind)` once the line grows past `limit` bytes,
/// and with `Closed` when the source is at EOF before the first byte.
pub async fn read_line<R>(r: &mut R, limit: usize, limit_kind: Limit) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut line = Vec::new();
    loop {
        let buf = r.fill_buf().await?;
        if buf.is_empty() {
            return Err(if line.is_empty() {
                Error::Closed
            } else {
                unexpected_eof("line")
            });
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(i) => {
                line.extend_from_slice(&buf[..i]);
                r.consume(i + 1);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.len() > limit {
                    return Err(Error::TooLarge(limit_kind));
                }
                return Ok(line);
            }
            None => {
                let n = buf.len();
                line.extend_from_slice(buf);
                r.consume(n);
                // one extra byte of slack for a CR split from its LF
                if line.len() > limit + 1 {
                    return Err(Error::TooLarge(limit_kind));
                }
            }
        }
    }
}

/// `tchar` from RFC 7230.
pub fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

pub fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_token_char)
}

/// Title-Case with `-` and `_` as word delimiters: `content-type` becomes
/// `Content-Type`, `x_forwarded_for` becomes `X_Forwarded_For`.
pub fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-' || c == '_';
    }
    out
}

/// Strips leading and trailing spaces and tabs.
pub fn trim_ows(s: &str) -> &str {
    s.trim_matches(|c| c == ' ' || c == '\t')
}
