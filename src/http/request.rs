use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use futures_util::future::BoxFuture;
use url::Url;

use crate::context::Context;
use crate::http::body::Body;
use crate::http::header::Header;
use crate::net::ConnIo;

/// HTTP request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// CONNECT - Open a tunnel
    CONNECT,
    /// TRACE - Loop the request back
    TRACE,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// Matching is case-sensitive, as on the wire.
    ///
    /// ```
    /// # use plow::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "HEAD" => Some(Method::HEAD),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "PATCH" => Some(Method::PATCH),
            "OPTIONS" => Some(Method::OPTIONS),
            "CONNECT" => Some(Method::CONNECT),
            "TRACE" => Some(Method::TRACE),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::PATCH => "PATCH",
            Method::OPTIONS => "OPTIONS",
            Method::CONNECT => "CONNECT",
            Method::TRACE => "TRACE",
        }
    }

    /// Methods that may carry a request body.
    pub fn is_postable(&self) -> bool {
        matches!(self, Method::POST | Method::PUT | Method::DELETE | Method::PATCH)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol version. `Http20` only appears for the `PRI` preface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
    Http20,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
            Version::Http20 => "HTTP/2.0",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback that takes over a connection after the response head is out.
pub type HijackFn = Box<dyn FnOnce(ConnIo) -> BoxFuture<'static, ()> + Send>;

/// A request as seen by a server handler.
///
/// The body borrows the connection, so a request lives for exactly one
/// transaction.
pub struct Request<'c> {
    pub version: Version,
    pub remote_addr: Option<SocketAddr>,
    pub method: Method,
    pub url: Url,
    pub header: Header,
    pub body: Body<'c>,
    pub(crate) ctx: Context,
    pub(crate) hijack: Option<HijackFn>,
}

impl<'c> Request<'c> {
    /// Context of the connection; cancelled when the server shuts down.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Hands the connection to `f` once the response head has been written.
    /// The server stops serving the connection afterwards.
    pub fn hijack<F>(&mut self, f: F)
    where
        F: FnOnce(ConnIo) -> BoxFuture<'static, ()> + Send + 'static,
    {
        self.hijack = Some(Box::new(f));
    }

    pub fn is_hijacked(&self) -> bool {
        self.hijack.is_some()
    }

    /// Query parameters. When a key repeats, the first value wins.
    pub fn query(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        for (k, v) in self.url.query_pairs() {
            out.entry(k.into_owned()).or_insert_with(|| v.into_owned());
        }
        out
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }
}

impl fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("version", &self.version)
            .field("remote_addr", &self.remote_addr)
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("header", &self.header)
            .field("hijack", &self.hijack.is_some())
            .finish()
    }
}
