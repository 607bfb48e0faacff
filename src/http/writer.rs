//! Message head serialization and the body output chain.

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::http::chunked::ChunkedWriter;
use crate::http::encoding::Encoder;
use crate::http::header::{CookieStyle, Header};
use crate::http::request::{Method, Version};
use crate::http::response::StatusCode;

/// Serializes a status line and header block, blank line included.
pub fn encode_response_head(buf: &mut BytesMut, version: Version, status: StatusCode, header: &Header) {
    buf.put_slice(version.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(status.as_u16().to_string().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(status.reason_phrase().as_bytes());
    buf.put_slice(b"\r\n");
    header.write_to(buf, CookieStyle::Response);
    buf.put_slice(b"\r\n");
}

/// Serializes a request line and header block, blank line included.
pub fn encode_request_head(buf: &mut BytesMut, method: Method, target: &str, header: &Header) {
    buf.put_slice(method.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(target.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");
    header.write_to(buf, CookieStyle::Request);
    buf.put_slice(b"\r\n");
}

/// Something that can produce a message body.
///
/// `content_length` is advertised up front; `None` means unknown, which
/// makes the sender fall back to chunked framing (or read-to-close on
/// HTTP/1.0).
pub trait BodyWriter: Send {
    fn content_length(&self) -> Option<u64>;

    fn write_body<'a>(&'a mut self, sink: &'a mut BodySink<'_>) -> BoxFuture<'a, Result<()>>;

    /// A fresh copy of the body, for replaying it on a redirect.
    fn try_clone(&self) -> Option<Box<dyn BodyWriter>> {
        None
    }
}

/// An in-memory body of known length.
#[derive(Debug, Clone, Default)]
pub struct Full(pub Bytes);

impl Full {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Full(data.into())
    }
}

impl BodyWriter for Full {
    fn content_length(&self) -> Option<u64> {
        Some(self.0.len() as u64)
    }

    fn write_body<'a>(&'a mut self, sink: &'a mut BodySink<'_>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { sink.write(&self.0).await })
    }

    fn try_clone(&self) -> Option<Box<dyn BodyWriter>> {
        Some(Box::new(self.clone()))
    }
}

/// A body of unknown length produced piece by piece.
pub struct StreamBody {
    stream: BoxStream<'static, Result<Bytes>>,
}

impl StreamBody {
    pub fn new(stream: BoxStream<'static, Result<Bytes>>) -> Self {
        Self { stream }
    }
}

impl BodyWriter for StreamBody {
    fn content_length(&self) -> Option<u64> {
        None
    }

    fn write_body<'a>(&'a mut self, sink: &'a mut BodySink<'_>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            while let Some(piece) = self.stream.next().await {
                sink.write(&piece?).await?;
            }
            Ok(())
        })
    }
}

type Out<'w> = &'w mut (dyn AsyncWrite + Unpin + Send);

enum Framed<'w> {
    Raw(Out<'w>),
    Chunked(ChunkedWriter<Out<'w>>),
}

/// Where a [`BodyWriter`] puts its bytes: an optional content encoder in
/// front of optional chunked framing in front of the connection.
pub struct BodySink<'w> {
    out: Framed<'w>,
    encoder: Option<Encoder>,
    expected: Option<u64>,
    written: u64,
    closed: bool,
}

impl<'w> BodySink<'w> {
    pub fn new(out: Out<'w>, chunked: bool, encoder: Option<Encoder>) -> Self {
        let out = if chunked {
            Framed::Chunked(ChunkedWriter::new(out))
        } else {
            Framed::Raw(out)
        };
        Self {
            out,
            encoder,
            expected: None,
            written: 0,
            closed: false,
        }
    }

    /// Holds the body to an advertised `Content-Length`: writing past it
    /// fails, and so does closing before it was reached.
    pub fn with_length(mut self, expected: Option<u64>) -> Self {
        self.expected = expected;
        self
    }

    /// Bytes accepted from the body, before encoding.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if let Some(n) = self.expected {
            if self.written + data.len() as u64 > n {
                return Err(Error::other(format!("body longer than the advertised {n} bytes")));
            }
        }
        self.written += data.len() as u64;
        match self.encoder.as_mut() {
            Some(encoder) => {
                let encoded = encoder.encode(data)?;
                self.emit(&encoded).await
            }
            None => self.emit(data).await,
        }
    }

    async fn emit(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        match &mut self.out {
            Framed::Raw(out) => out.write_all(data).await?,
            Framed::Chunked(w) => w.write(data).await?,
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        match &mut self.out {
            Framed::Raw(out) => out.flush().await?,
            Framed::Chunked(w) => w.flush().await?,
        }
        Ok(())
    }

    /// Closes the chain from the outside in: the encoder tail is written,
    /// then the chunked terminator, then the connection is flushed. Every
    /// step runs; the first failure is reported.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let mut first: Option<Error> = None;

        if let Some(mut encoder) = self.encoder.take() {
            match encoder.finish() {
                Ok(tail) => {
                    if let Err(err) = self.emit(&tail).await {
                        first.get_or_insert(err);
                    }
                }
                Err(err) => {
                    first.get_or_insert(err);
                }
            }
        }
        self.closed = true;

        let res = match &mut self.out {
            Framed::Raw(out) => out.flush().await.map_err(Error::from),
            Framed::Chunked(w) => w.close().await,
        };
        if let Err(err) = res {
            first.get_or_insert(err);
        }
        if let Some(n) = self.expected {
            if self.written < n {
                first.get_or_insert(Error::other(format!(
                    "body ended after {} of the advertised {n} bytes",
                    self.written
                )));
            }
        }

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::chunked::ChunkedReader;
    use crate::http::encoding::{decode_all, ContentEncoding};

    #[test]
    fn response_head_layout() {
        let mut h = Header::new();
        h.set("content-type", "text/plain").unwrap();
        let mut buf = BytesMut::new();
        encode_response_head(&mut buf, Version::Http11, StatusCode::NOT_FOUND, &h);
        assert_eq!(&buf[..], b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\n\r\n");
    }

    #[test]
    fn request_head_layout() {
        let mut h = Header::new();
        h.set("host", "example.com").unwrap();
        let mut buf = BytesMut::new();
        encode_request_head(&mut buf, Method::GET, "/a?b=c", &h);
        assert_eq!(&buf[..], b"GET /a?b=c HTTP/1.1\r\nHost: example.com\r\n\r\n");
    }

    #[tokio::test]
    async fn raw_sink_passes_bytes() {
        let mut out: Vec<u8> = Vec::new();
        let mut body = Full::new("payload");
        {
            let mut sink = BodySink::new(&mut out, false, None);
            body.write_body(&mut sink).await.unwrap();
            sink.close().await.unwrap();
            assert_eq!(sink.written(), 7);
        }
        assert_eq!(out, b"payload");
    }

    #[tokio::test]
    async fn chunked_gzip_chain() {
        let mut out: Vec<u8> = Vec::new();
        {
            let mut sink = BodySink::new(&mut out, true, Some(Encoder::new(ContentEncoding::Gzip)));
            sink.write(b"hello ").await.unwrap();
            sink.write(b"world").await.unwrap();
            sink.close().await.unwrap();
            assert!(sink.write(b"late").await.is_err());
        }
        assert!(out.ends_with(b"0\r\n\r\n"));

        let mut compressed = Vec::new();
        ChunkedReader::new(&out[..]).read_to_end(&mut compressed).await.unwrap();
        assert_eq!(decode_all(ContentEncoding::Gzip, &compressed).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn advertised_length_is_enforced() {
        let mut out: Vec<u8> = Vec::new();
        {
            let mut sink = BodySink::new(&mut out, false, None).with_length(Some(4));
            sink.write(b"abc").await.unwrap();
            assert!(sink.write(b"de").await.is_err());
            assert!(sink.close().await.is_err());
        }
        assert_eq!(out, b"abc");

        let mut out: Vec<u8> = Vec::new();
        let mut sink = BodySink::new(&mut out, false, None).with_length(Some(3));
        sink.write(b"abc").await.unwrap();
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn stream_body_has_no_length() {
        let pieces = futures_util::stream::iter(vec![Ok(Bytes::from_static(b"a")), Ok(Bytes::from_static(b"b"))]);
        let mut body = StreamBody::new(pieces.boxed());
        assert_eq!(body.content_length(), None);
        let mut out: Vec<u8> = Vec::new();
        {
            let mut sink = BodySink::new(&mut out, true, None);
            body.write_body(&mut sink).await.unwrap();
            sink.close().await.unwrap();
        }
        assert_eq!(out, b"1\r\na\r\n1\r\nb\r\n0\r\n\r\n");
    }
}
