//! Request line, status line and header block parsing.

use tokio::io::AsyncBufRead;

use crate::error::{unexpected_eof, Error, Limit, Part, Result};
use crate::http::cookie::{parse_cookie_header, parse_set_cookie};
use crate::http::header::Header;
use crate::http::line::{is_token, read_line, title_case, trim_ows};
use crate::http::request::Version;

/// Decoded `METHOD SP TARGET SP HTTP/M.N`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// Taken verbatim; validated by the caller.
    pub method: String,
    pub target: String,
    pub version: Version,
}

impl RequestLine {
    /// True for the `PRI * HTTP/2.0` connection preface.
    pub fn is_h2_preface(&self) -> bool {
        self.method == "PRI" && self.target == "*" && self.version == Version::Http20
    }
}

/// Decoded `HTTP/M.N SP CODE SP REASON`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: Version,
    pub status: u16,
    pub reason: String,
}

fn as_str(line: &[u8]) -> Result<&str> {
    std::str::from_utf8(line).map_err(|_| Error::invalid(Part::Headline, "not valid UTF-8"))
}

/// Checks the `HTTP/M.N` shape and returns `(M, N)`.
fn protocol(proto: &str) -> Result<(u8, u8)> {
    let b = proto.as_bytes();
    if b.len() != 8 || !proto.starts_with("HTTP/") || b[6] != b'.' {
        return Err(Error::invalid(Part::Headline, format!("bad protocol {proto:?}")));
    }
    if !b[5].is_ascii_digit() || !b[7].is_ascii_digit() {
        return Err(Error::invalid(Part::Headline, format!("bad protocol {proto:?}")));
    }
    Ok((b[5] - b'0', b[7] - b'0'))
}

pub fn parse_request_line(line: &[u8]) -> Result<RequestLine> {
    let line = as_str(line)?;
    let mut parts = line.splitn(3, ' ');
    let (Some(method), Some(target), Some(proto)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::invalid(Part::Headline, format!("malformed request line {line:?}")));
    };
    if method.is_empty() || target.is_empty() {
        return Err(Error::invalid(Part::Headline, format!("malformed request line {line:?}")));
    }
    let version = match protocol(proto)? {
        (1, 0) => Version::Http10,
        (1, 1) => Version::Http11,
        (2, 0) if method == "PRI" && target == "*" => Version::Http20,
        _ => {
            return Err(Error::invalid(Part::Version, format!("unsupported version {proto:?}")));
        }
    };
    Ok(RequestLine {
        method: method.to_string(),
        target: target.to_string(),
        version,
    })
}

pub fn parse_status_line(line: &[u8]) -> Result<StatusLine> {
    let line = as_str(line)?;
    if !line.starts_with("HTTP/") {
        return Err(Error::invalid(Part::Headline, format!("malformed status line {line:?}")));
    }
    let mut parts = line.splitn(3, ' ');
    let proto = parts.next().unwrap_or_default();
    let code = parts.next().unwrap_or_default();
    let reason = parts.next().unwrap_or_default();

    let version = match protocol(proto)? {
        (1, 0) => Version::Http10,
        (1, 1) => Version::Http11,
        _ => {
            return Err(Error::invalid(Part::Version, format!("unsupported version {proto:?}")));
        }
    };
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::invalid(Part::Status, format!("bad status code {code:?}")));
    }
    let status = code
        .parse()
        .map_err(|_| Error::invalid(Part::Status, format!("bad status code {code:?}")))?;
    Ok(StatusLine {
        version,
        status,
        reason: reason.to_string(),
    })
}

/// Reads header lines up to and including the empty line that ends the
/// block.
///
/// Each line is capped at `line_limit` bytes and the whole block at
/// `total_limit`; both fail with `TooLarge(Header)`. `Cookie` and
/// `Set-Cookie` lines land in the cookie map. A later field replaces an
/// earlier one with the same name.
pub async fn read_header<R>(r: &mut R, line_limit: usize, total_limit: usize) -> Result<Header>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut header = Header::new();
    let mut pending: Option<(String, String)> = None;
    let mut total = 0usize;

    loop {
        let line = read_line(r, line_limit, Limit::Header)
            .await
            .map_err(|e| match e {
                Error::Closed => unexpected_eof("header"),
                other => other,
            })?;
        total += line.len() + 2;
        if total > total_limit {
            return Err(Error::TooLarge(Limit::Header));
        }
        if line.is_empty() {
            break;
        }

        let text = std::str::from_utf8(&line)
            .map_err(|_| Error::invalid(Part::Header, "header line is not valid UTF-8"))?;
        if line[0] == b' ' || line[0] == b'\t' {
            let Some((_, value)) = pending.as_mut() else {
                return Err(Error::invalid(Part::Header, "malformed header initial line"));
            };
            value.push(' ');
            value.push_str(trim_ows(text));
            continue;
        }

        if let Some((name, value)) = pending.take() {
            commit(&mut header, &name, &value)?;
        }
        let Some((name, value)) = text.split_once(':') else {
            return Err(Error::invalid(Part::Header, format!("missing colon in {text:?}")));
        };
        let name = trim_ows(name);
        if !is_token(name) {
            return Err(Error::invalid(Part::Header, format!("bad field name {name:?}")));
        }
        pending = Some((title_case(name), trim_ows(value).to_string()));
    }

    if let Some((name, value)) = pending.take() {
        commit(&mut header, &name, &value)?;
    }
    Ok(header)
}

fn commit(header: &mut Header, name: &str, value: &str) -> Result<()> {
    if value.bytes().any(|b| (b < 0x20 && b != b'\t') || b == 0x7f) {
        return Err(Error::invalid(
            Part::Header,
            format!("control character in {name} value"),
        ));
    }
    match name {
        "Cookie" => {
            for cookie in parse_cookie_header(value)? {
                header.set_cookie(cookie);
            }
        }
        "Set-Cookie" => match parse_set_cookie(value) {
            Ok(cookie) => header.set_cookie(cookie),
            Err(err) => tracing::debug!(%err, "dropping malformed Set-Cookie"),
        },
        _ => header.set_raw(name, value),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn request_line_fields() {
        let rl = parse_request_line(b"GET /index.html?a=1 HTTP/1.1").unwrap();
        assert_eq!(rl.method, "GET");
        assert_eq!(rl.target, "/index.html?a=1");
        assert_eq!(rl.version, Version::Http11);
        assert!(!rl.is_h2_preface());
    }

    #[test]
    fn request_line_needs_single_spaces() {
        assert!(parse_request_line(b"GET  / HTTP/1.1").is_err());
        assert!(parse_request_line(b"GET / HTTP/1.1 ").is_err());
        assert!(parse_request_line(b"GET /").is_err());
    }

    #[test]
    fn unsupported_versions_are_version_errors() {
        let err = parse_request_line(b"GET / HTTP/1.2").unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { part: Part::Version, .. }));
        let err = parse_request_line(b"GET / HTTP/2.0").unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { part: Part::Version, .. }));
        let err = parse_request_line(b"GET / HTTX/1.1").unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { part: Part::Headline, .. }));
    }

    #[test]
    fn h2_preface() {
        let rl = parse_request_line(b"PRI * HTTP/2.0").unwrap();
        assert!(rl.is_h2_preface());
    }

    #[test]
    fn status_line() {
        let sl = parse_status_line(b"HTTP/1.1 404 Not Found").unwrap();
        assert_eq!(sl.status, 404);
        assert_eq!(sl.reason, "Not Found");
        assert_eq!(parse_status_line(b"HTTP/1.0 200").unwrap().status, 200);
        assert!(parse_status_line(b"HTTP/1.1 20 OK").is_err());
        assert!(parse_status_line(b"ICY 200 OK").is_err());
    }

    #[tokio::test]
    async fn folds_and_normalizes() {
        let mut src: &[u8] =
            b"content-type: text/plain\r\nX-Long: first\r\n\t second\r\nx-long2:  v \r\n\r\nBODY";
        let h = read_header(&mut src, 128, 1024).await.unwrap();
        assert_eq!(h.get("Content-Type"), Some("text/plain"));
        assert_eq!(h.get("X-Long"), Some("first second"));
        assert_eq!(h.get("X-Long2"), Some("v"));
        assert_eq!(src, b"BODY");
    }

    #[tokio::test]
    async fn leading_whitespace_on_first_line_fails() {
        let mut src: &[u8] = b" X-A: 1\r\n\r\n";
        let err = read_header(&mut src, 128, 1024).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFormat);
    }

    #[tokio::test]
    async fn routes_cookies() {
        let mut src: &[u8] = b"Cookie: a=1; b=2\r\nSet-Cookie: sid=x; Path=/\r\n\r\n";
        let h = read_header(&mut src, 128, 1024).await.unwrap();
        assert_eq!(h.cookie("a").unwrap().value, "1");
        assert_eq!(h.cookie("b").unwrap().value, "2");
        assert_eq!(h.cookie("sid").unwrap().path.as_deref(), Some("/"));
        assert!(!h.contains("Cookie"));
        assert!(!h.contains("Set-Cookie"));
    }

    #[tokio::test]
    async fn budgets() {
        let mut src: &[u8] = b"X-A: 0123456789\r\n\r\n";
        let err = read_header(&mut src, 8, 1024).await.unwrap_err();
        assert!(matches!(err, Error::TooLarge(Limit::Header)));

        let mut src: &[u8] = b"X-A: 1\r\nX-B: 2\r\nX-C: 3\r\n\r\n";
        let err = read_header(&mut src, 64, 16).await.unwrap_err();
        assert!(matches!(err, Error::TooLarge(Limit::Header)));
    }

    #[tokio::test]
    async fn rejects_bad_names_and_truncation() {
        let mut src: &[u8] = b"Bad Name: x\r\n\r\n";
        assert!(read_header(&mut src, 64, 1024).await.is_err());

        let mut src: &[u8] = b"X-A: 1\r\n";
        assert!(read_header(&mut src, 64, 1024).await.unwrap_err().is_eof());
    }
}
