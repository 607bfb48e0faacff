use std::fmt;

use bytes::Bytes;

use crate::http::cookie::Cookie;
use crate::http::header::Header;
use crate::http::writer::{BodyWriter, Full};

/// HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const CONTINUE: StatusCode = StatusCode(100);
    pub const SWITCHING_PROTOCOLS: StatusCode = StatusCode(101);
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const ACCEPTED: StatusCode = StatusCode(202);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const PARTIAL_CONTENT: StatusCode = StatusCode(206);
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const SEE_OTHER: StatusCode = StatusCode(303);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const TEMPORARY_REDIRECT: StatusCode = StatusCode(307);
    pub const PERMANENT_REDIRECT: StatusCode = StatusCode(308);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const PROXY_AUTHENTICATION_REQUIRED: StatusCode = StatusCode(407);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const LENGTH_REQUIRED: StatusCode = StatusCode(411);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const URI_TOO_LONG: StatusCode = StatusCode(414);
    pub const UNSUPPORTED_MEDIA_TYPE: StatusCode = StatusCode(415);
    pub const EXPECTATION_FAILED: StatusCode = StatusCode(417);
    pub const MISDIRECTED_REQUEST: StatusCode = StatusCode(421);
    pub const UNPROCESSABLE_ENTITY: StatusCode = StatusCode(422);
    pub const UPGRADE_REQUIRED: StatusCode = StatusCode(426);
    pub const TOO_MANY_REQUESTS: StatusCode = StatusCode(429);
    pub const REQUEST_HEADER_FIELDS_TOO_LARGE: StatusCode = StatusCode(431);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    pub const BAD_GATEWAY: StatusCode = StatusCode(502);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);
    pub const GATEWAY_TIMEOUT: StatusCode = StatusCode(504);
    pub const HTTP_VERSION_NOT_SUPPORTED: StatusCode = StatusCode(505);

    pub const fn new(code: u16) -> Self {
        StatusCode(code)
    }

    /// Returns the numeric HTTP status code.
    ///
    /// ```
    /// # use plow::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.as_u16(), 200);
    /// assert_eq!(StatusCode::NOT_FOUND.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns the standard reason phrase, or an empty string for codes
    /// outside the table.
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            411 => "Length Required",
            413 => "Request Entity Too Large",
            414 => "Request URI Too Long",
            415 => "Unsupported Media Type",
            417 => "Expectation Failed",
            421 => "Misdirected Request",
            422 => "Unprocessable Entity",
            426 => "Upgrade Required",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "",
        }
    }

    /// Statuses that carry a body: anything but 1xx, 204 and 3xx.
    pub fn is_replyable(&self) -> bool {
        !(self.is_informational() || self.0 == 204 || self.is_redirection())
    }

    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.0)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    pub fn is_redirection(&self) -> bool {
        (300..400).contains(&self.0)
    }

    /// Redirects a client follows through `Location`.
    pub fn is_redirect(&self) -> bool {
        matches!(self.0, 301 | 302 | 303 | 307 | 308)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.reason_phrase())
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

/// A response produced by a handler.
///
/// The body is optional; when present its advertised length decides the
/// framing on the wire.
pub struct Response {
    pub status: StatusCode,
    pub header: Header,
    pub body: Option<Box<dyn BodyWriter>>,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("header", &self.header)
            .field("content_length", &self.content_length())
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// ```
/// # use plow::http::response::{ResponseBuilder, StatusCode};
/// let response = ResponseBuilder::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body("{}")
///     .build();
/// assert_eq!(response.content_length(), Some(2));
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    header: Header,
    body: Option<Box<dyn BodyWriter>>,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            header: Header::new(),
            body: None,
        }
    }

    /// Adds or replaces a header. Invalid fields are logged and skipped.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        if let Err(err) = self.header.set(name, value) {
            tracing::warn!(%err, name, "skipping response header");
        }
        self
    }

    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.header.set_cookie(cookie);
        self
    }

    /// Sets an in-memory body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(Box::new(Full::new(body)));
        self
    }

    /// Sets a body from any [`BodyWriter`].
    pub fn writer(mut self, body: impl BodyWriter + 'static) -> Self {
        self.body = Some(Box::new(body));
        self
    }

    pub fn build(self) -> Response {
        Response {
            status: self.status,
            header: self.header,
            body: self.body,
        }
    }
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        ResponseBuilder::new(status).build()
    }

    pub fn builder(status: StatusCode) -> ResponseBuilder {
        ResponseBuilder::new(status)
    }

    /// A `text/plain` response.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body.into())
            .build()
    }

    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(StatusCode::OK).body(body).build()
    }

    pub fn not_found() -> Self {
        Self::text(StatusCode::NOT_FOUND, "404 Not Found")
    }

    pub fn internal_error() -> Self {
        Self::text(StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error")
    }

    /// Canned error response whose body is the reason phrase.
    pub fn error(status: StatusCode) -> Self {
        Self::text(status, status.reason_phrase())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.body.as_ref().and_then(|b| b.content_length())
    }
}
