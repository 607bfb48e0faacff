//! Case-insensitive header container with a cookie sub-map.

use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Part, Result};
use crate::http::cookie::Cookie;
use crate::http::line::{is_token, title_case};

/// Which cookie header a [`Header`] serializes its cookies into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieStyle {
    /// One `Cookie: a=1; b=2` line.
    Request,
    /// One `Set-Cookie:` line per cookie.
    Response,
}

/// Header fields keyed by Title-Case name, one value per name, plus cookies
/// keyed by cookie name.
///
/// `Cookie` and `Set-Cookie` never live in the field map; they are parsed
/// into cookies on the way in and rendered from cookies on the way out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    fields: BTreeMap<String, String>,
    cookies: BTreeMap<String, Cookie>,
}

fn is_cookie_field(name: &str) -> bool {
    name == "Cookie" || name == "Set-Cookie"
}

fn validate_value(value: &str) -> Result<()> {
    if value.bytes().any(|b| (b < 0x20 && b != b'\t') || b == 0x7f) {
        return Err(Error::invalid(Part::Header, "control character in value"));
    }
    Ok(())
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(&title_case(name)).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(&title_case(name))
    }

    /// Sets a field, replacing any previous value.
    ///
    /// The name must be a token and the value must not contain control
    /// characters. `Cookie` and `Set-Cookie` are refused: use
    /// [`Header::set_cookie`].
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        if !is_token(name) {
            return Err(Error::invalid(Part::Header, format!("bad field name {name:?}")));
        }
        let key = title_case(name);
        if is_cookie_field(&key) {
            return Err(Error::invalid(
                Part::Header,
                format!("{key} must be set through the cookie API"),
            ));
        }
        let value = value.into();
        validate_value(&value)?;
        self.fields.insert(key, value.trim_matches([' ', '\t']).to_string());
        Ok(())
    }

    /// Sets a field the stack itself controls. Name and value are trusted.
    pub(crate) fn set_raw(&mut self, name: &str, value: impl Into<String>) {
        self.fields.insert(title_case(name), value.into());
    }

    /// Sets the field only when it is absent.
    pub(crate) fn set_default(&mut self, name: &str, value: impl Into<String>) {
        self.fields.entry(title_case(name)).or_insert_with(|| value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.fields.remove(&title_case(name))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.cookies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True when the comma-separated field contains `token`, ignoring case.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get(name).is_some_and(|v| {
            v.split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }

    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.get(name)
    }

    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.cookies.insert(cookie.name.clone(), cookie);
    }

    pub fn remove_cookie(&mut self, name: &str) -> Option<Cookie> {
        self.cookies.remove(name)
    }

    pub fn cookies(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.values()
    }

    pub fn clear_cookies(&mut self) {
        self.cookies.clear();
    }

    /// Appends `Name: value\r\n` lines for every field and cookie.
    pub fn write_to(&self, buf: &mut BytesMut, style: CookieStyle) {
        for (name, value) in &self.fields {
            put_field(buf, name, value);
        }
        match style {
            CookieStyle::Request => {
                if !self.cookies.is_empty() {
                    let joined = self
                        .cookies
                        .values()
                        .map(Cookie::pair)
                        .collect::<Vec<_>>()
                        .join("; ");
                    put_field(buf, "Cookie", &joined);
                }
            }
            CookieStyle::Response => {
                for cookie in self.cookies.values() {
                    put_field(buf, "Set-Cookie", &cookie.to_set_cookie());
                }
            }
        }
    }
}

fn put_field(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_slice(b"\r\n");
}
