//! Error kinds shared by the whole stack.
//!
//! Every failure is one [`Error`] value. Components that own an operation
//! (dialing, reading a response, following redirects, ...) tag the error once
//! with an [`Op`]; errors that already carry a tag pass through unchanged so the
//! innermost operation wins.

use std::fmt;
use std::io;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Operation tag attached by [`Error::op`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read,
    Write,
    Dial,
    Proxy,
    Tls,
    Parsing,
    Redirect,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Read => "read",
            Op::Write => "write",
            Op::Dial => "dial",
            Op::Proxy => "proxy",
            Op::Tls => "tls",
            Op::Parsing => "parsing",
            Op::Redirect => "redirect",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The budget a [`Error::TooLarge`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    RequestLine,
    Line,
    Header,
    Body,
    Frame,
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Limit::RequestLine => "request line",
            Limit::Line => "line",
            Limit::Header => "header",
            Limit::Body => "body",
            Limit::Frame => "frame",
        })
    }
}

/// The message part a [`Error::InvalidFormat`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    Method,
    Url,
    Version,
    Headline,
    Header,
    Cookie,
    ContentLength,
    ChunkSize,
    Status,
    Handshake,
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Part::Method => "method",
            Part::Url => "url",
            Part::Version => "version",
            Part::Headline => "headline",
            Part::Header => "header",
            Part::Cookie => "cookie",
            Part::ContentLength => "content length",
            Part::ChunkSize => "chunk size",
            Part::Status => "status",
            Part::Handshake => "handshake",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("operation cancelled")]
    Cancelled,

    #[error("i/o timeout")]
    Timeout,

    #[error("use of closed connection")]
    Closed,

    #[error("{0} too large")]
    TooLarge(Limit),

    #[error("malformed {part}: {detail}")]
    InvalidFormat { part: Part, detail: String },

    #[error("unknown transfer encoding {0:?}")]
    UnknownTransferEncoding(String),

    #[error("unknown content encoding {0:?}")]
    UnknownContentEncoding(String),

    #[error("websocket protocol error: {0}")]
    Protocol(String),

    #[error("chunked trailer: unexpected EOF")]
    TrailerEof,

    #[error("{op}: {source}")]
    Op {
        op: Op,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(io::Error),
}

/// Fieldless view of an [`Error`], looking through operation tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Cancelled,
    Timeout,
    Closed,
    TooLarge,
    InvalidFormat,
    UnknownTransferEncoding,
    UnknownContentEncoding,
    Protocol,
    TrailerEof,
    Other,
    Io,
}

impl Error {
    /// Tags `err` with `op` unless it already carries a tag.
    pub fn op(op: Op, err: impl Into<Error>) -> Error {
        match err.into() {
            wrapped @ Error::Op { .. } => wrapped,
            inner => Error::Op {
                op,
                source: Box::new(inner),
            },
        }
    }

    pub fn invalid(part: Part, detail: impl Into<String>) -> Error {
        Error::InvalidFormat {
            part,
            detail: detail.into(),
        }
    }

    pub fn protocol(detail: impl Into<String>) -> Error {
        Error::Protocol(detail.into())
    }

    pub fn other(detail: impl Into<String>) -> Error {
        Error::Other(detail.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Timeout => ErrorKind::Timeout,
            Error::Closed => ErrorKind::Closed,
            Error::TooLarge(_) => ErrorKind::TooLarge,
            Error::InvalidFormat { .. } => ErrorKind::InvalidFormat,
            Error::UnknownTransferEncoding(_) => ErrorKind::UnknownTransferEncoding,
            Error::UnknownContentEncoding(_) => ErrorKind::UnknownContentEncoding,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::TrailerEof => ErrorKind::TrailerEof,
            Error::Other(_) => ErrorKind::Other,
            Error::Io(_) => ErrorKind::Io,
            Error::Op { source, .. } => source.kind(),
        }
    }

    /// The outermost operation tag, if any.
    pub fn operation(&self) -> Option<Op> {
        match self {
            Error::Op { op, .. } => Some(*op),
            _ => None,
        }
    }

    /// The error with operation tags stripped.
    pub fn root(&self) -> &Error {
        match self {
            Error::Op { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// True for an unexpected end of stream from the peer.
    pub fn is_eof(&self) -> bool {
        matches!(self.root(), Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(inner) = inner.downcast::<Error>() {
                    return *inner;
                }
            }
            return Error::Other("wrapped error lost".into());
        }
        match err.kind() {
            io::ErrorKind::TimedOut => Error::Timeout,
            _ => Error::Io(err),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::Timeout => io::Error::new(io::ErrorKind::TimedOut, Error::Timeout),
            other => io::Error::other(other),
        }
    }
}

/// Tagging helper for `Result`s.
pub trait ResultExt<T> {
    fn op(self, op: Op) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn op(self, op: Op) -> Result<T> {
        self.map_err(|e| Error::op(op, e))
    }
}

pub(crate) fn unexpected_eof(what: &str) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("unexpected EOF while reading {what}"),
    ))
}
