use std::fmt;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::http::body::BodyReader;
use crate::http::header::Header;
use crate::http::request::Version;
use crate::http::response::StatusCode;
use crate::net::ConnIo;

/// Response body that owns its connection. Dropping it closes the
/// connection.
pub type ResponseBody = BodyReader<ConnIo>;

/// A response read by the [`RoundTripper`](crate::client::RoundTripper).
pub struct ClientResponse {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
    pub header: Header,
    /// `None` when the status or method carries no body, or when the
    /// connection was handed to a transport hijacker.
    pub body: Option<ResponseBody>,
}

impl ClientResponse {
    /// Reads the whole body.
    pub async fn bytes(&mut self) -> Result<Bytes> {
        match self.body.as_mut() {
            Some(body) => body.bytes().await,
            None => Ok(Bytes::new()),
        }
    }

    pub async fn text(&mut self) -> Result<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::other("response body is not valid UTF-8"))
    }

    /// `Location` header, for redirects.
    pub fn location(&self) -> Option<&str> {
        self.header.get("Location")
    }

    /// Releases the connection without reading the rest of the body.
    pub async fn close(&mut self) {
        if let Some(body) = self.body.take() {
            let mut io = body.into_inner();
            let _ = io.get_mut().shutdown().await;
        }
    }
}

impl fmt::Debug for ClientResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientResponse")
            .field("version", &self.version)
            .field("status", &self.status)
            .field("header", &self.header)
            .field("body", &self.body.is_some())
            .finish()
    }
}
