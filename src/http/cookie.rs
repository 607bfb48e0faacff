//! `Cookie:` / `Set-Cookie:` parsing and serialization.

use std::fmt;
use std::time::{Duration, SystemTime};

use crate::error::{Error, Part, Result};
use crate::http::line::{is_token, trim_ows};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
            SameSite::None => "None",
        }
    }
}

/// An HTTP cookie.
///
/// `max_age` follows the wire semantics: `0` means unset, a positive value is
/// a lifetime in seconds and dominates `expires`, a negative value means the
/// cookie is already expired. Parsing collapses a positive `Max-Age` into
/// `expires`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<SystemTime>,
    pub max_age: i64,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_expires(mut self, at: SystemTime) -> Self {
        self.expires = Some(at);
        self
    }

    pub fn with_max_age(mut self, secs: i64) -> Self {
        self.max_age = secs;
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        if self.max_age < 0 {
            return true;
        }
        if self.max_age > 0 {
            return false;
        }
        self.expires.is_some_and(|at| at <= now)
    }

    /// `name=value` as sent in a `Cookie:` header.
    pub fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }

    /// Attributes in fixed order: `Max-Age` (or `Expires`), `Domain`, `Path`,
    /// `HttpOnly`, `Secure`, `SameSite`.
    pub fn to_set_cookie(&self) -> String {
        let mut out = self.pair();
        if self.max_age > 0 {
            out.push_str(&format!("; Max-Age={}", self.max_age));
        } else if self.max_age < 0 {
            out.push_str("; Max-Age=0");
        } else if let Some(at) = self.expires {
            out.push_str("; Expires=");
            out.push_str(&httpdate::fmt_http_date(at));
        }
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if let Some(same_site) = self.same_site {
            out.push_str("; SameSite=");
            out.push_str(same_site.as_str());
        }
        out
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_set_cookie())
    }
}

/// Splits a `Cookie:` header value into cookies. Pairs without `=` get an
/// empty value; empty segments are skipped.
pub fn parse_cookie_header(value: &str) -> Result<Vec<Cookie>> {
    let mut cookies = Vec::new();
    for segment in value.split(';') {
        let segment = trim_ows(segment);
        if segment.is_empty() {
            continue;
        }
        let (name, value) = match segment.split_once('=') {
            Some((n, v)) => (trim_ows(n), trim_ows(v)),
            None => (segment, ""),
        };
        if !is_token(name) {
            return Err(Error::invalid(Part::Cookie, format!("bad cookie name {name:?}")));
        }
        cookies.push(Cookie::new(name, unquote(value)));
    }
    Ok(cookies)
}

/// Parses one `Set-Cookie:` header value. Unknown attributes are ignored;
/// `Max-Age` wins over `Expires`.
pub fn parse_set_cookie(value: &str) -> Result<Cookie> {
    parse_set_cookie_at(value, SystemTime::now())
}

pub(crate) fn parse_set_cookie_at(value: &str, now: SystemTime) -> Result<Cookie> {
    let mut parts = value.split(';');
    let first = trim_ows(parts.next().unwrap_or_default());
    let (name, val) = first
        .split_once('=')
        .ok_or_else(|| Error::invalid(Part::Cookie, format!("missing '=' in {first:?}")))?;
    let name = trim_ows(name);
    if !is_token(name) {
        return Err(Error::invalid(Part::Cookie, format!("bad cookie name {name:?}")));
    }
    let mut cookie = Cookie::new(name, unquote(trim_ows(val)));
    let mut max_age: Option<i64> = None;

    for attr in parts {
        let attr = trim_ows(attr);
        if attr.is_empty() {
            continue;
        }
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (trim_ows(k), trim_ows(v)),
            None => (attr, ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "expires" => {
                if let Ok(at) = httpdate::parse_http_date(val) {
                    cookie.expires = Some(at);
                }
            }
            "max-age" => {
                if let Ok(secs) = val.parse::<i64>() {
                    max_age = Some(secs);
                }
            }
            "domain" if !val.is_empty() => {
                cookie.domain = Some(val.trim_start_matches('.').to_ascii_lowercase());
            }
            "path" if !val.is_empty() => cookie.path = Some(val.to_string()),
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            "samesite" => {
                cookie.same_site = match val.to_ascii_lowercase().as_str() {
                    "lax" => Some(SameSite::Lax),
                    "strict" => Some(SameSite::Strict),
                    "none" => Some(SameSite::None),
                    _ => None,
                }
            }
            _ => {}
        }
    }

    match max_age {
        Some(secs) if secs > 0 => {
            cookie.expires = Some(now + Duration::from_secs(secs as u64));
            cookie.max_age = 0;
        }
        Some(_) => cookie.max_age = -1,
        None => {}
    }
    Ok(cookie)
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_pairs() {
        let cookies = parse_cookie_header(" a=1; b = two ;flag; ").unwrap();
        assert_eq!(cookies.len(), 3);
        assert_eq!(cookies[0].pair(), "a=1");
        assert_eq!(cookies[1].pair(), "b=two");
        assert_eq!(cookies[2].name, "flag");
        assert_eq!(cookies[2].value, "");
    }

    #[test]
    fn set_cookie_attributes() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let c = parse_set_cookie_at(
            "sid=abc; Path=/; Domain=.Example.com; Max-Age=60; Secure; HttpOnly; SameSite=Strict; Foo=bar",
            now,
        )
        .unwrap();
        assert_eq!(c.name, "sid");
        assert_eq!(c.value, "abc");
        assert_eq!(c.path.as_deref(), Some("/"));
        assert_eq!(c.domain.as_deref(), Some("example.com"));
        assert_eq!(c.expires, Some(now + Duration::from_secs(60)));
        assert_eq!(c.max_age, 0);
        assert!(c.secure && c.http_only);
        assert_eq!(c.same_site, Some(SameSite::Strict));
    }

    #[test]
    fn max_age_overrides_expires() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let c = parse_set_cookie_at("a=b; Expires=Wed, 21 Oct 2015 07:28:00 GMT; Max-Age=10", now).unwrap();
        assert_eq!(c.expires, Some(now + Duration::from_secs(10)));

        let gone = parse_set_cookie_at("a=b; Max-Age=0", now).unwrap();
        assert_eq!(gone.max_age, -1);
        assert!(gone.is_expired(now));
    }

    #[test]
    fn serialization_order() {
        let c = Cookie::new("id", "7")
            .with_max_age(30)
            .with_domain("example.com")
            .with_path("/app")
            .http_only()
            .secure()
            .with_same_site(SameSite::Lax);
        assert_eq!(
            c.to_set_cookie(),
            "id=7; Max-Age=30; Domain=example.com; Path=/app; HttpOnly; Secure; SameSite=Lax"
        );
    }

    #[test]
    fn serialize_then_parse_keeps_attributes() {
        let expires = SystemTime::UNIX_EPOCH + Duration::from_secs(1_800_000_000);
        let c = Cookie::new("k", "v")
            .with_expires(expires)
            .with_domain("example.org")
            .with_path("/")
            .secure()
            .with_same_site(SameSite::None);
        let parsed = parse_set_cookie(&c.to_set_cookie()).unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn rejects_nameless_cookie() {
        assert!(parse_set_cookie("=value").is_err());
        assert!(parse_set_cookie("novalue").is_err());
    }
}
