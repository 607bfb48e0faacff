use std::fmt;

use bytes::Bytes;
use url::Url;

use crate::error::{Error, Part, Result};
use crate::http::cookie::Cookie;
use crate::http::header::Header;
use crate::http::request::Method;
use crate::http::writer::{BodyWriter, Full};

/// An outgoing request.
pub struct ClientRequest {
    pub method: Method,
    pub url: Url,
    pub header: Header,
    pub body: Option<Box<dyn BodyWriter>>,
}

impl ClientRequest {
    pub fn new(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::invalid(Part::Url, format!("{url:?}: {e}")))?;
        Ok(Self::from_url(method, url))
    }

    pub fn from_url(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            header: Header::new(),
            body: None,
        }
    }

    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    pub fn post(url: &str, body: impl Into<Bytes>) -> Result<Self> {
        Ok(Self::new(Method::POST, url)?.with_body(Full::new(body)))
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Result<Self> {
        self.header.set(name, value)?;
        Ok(self)
    }

    pub fn with_body(mut self, body: impl BodyWriter + 'static) -> Self {
        self.body = Some(Box::new(body));
        self
    }

    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.header.set_cookie(cookie);
        self
    }

    /// Target as written on the request line: origin form, or absolute
    /// form when talking to a forwarding proxy.
    pub(crate) fn target(&self, absolute: bool) -> String {
        if absolute {
            let mut url = self.url.clone();
            url.set_fragment(None);
            let _ = url.set_username("");
            let _ = url.set_password(None);
            return url.to_string();
        }
        match self.url.query() {
            Some(q) => format!("{}?{}", self.url.path(), q),
            None => self.url.path().to_string(),
        }
    }
}

impl fmt::Debug for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("header", &self.header)
            .field("body", &self.body.as_ref().map(|b| b.content_length()))
            .finish()
    }
}
