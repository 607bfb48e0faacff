//! Message body reader: framing, optional content decoding and a size cap.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{unexpected_eof, Error, Limit, Result};
use crate::http::chunked::ChunkedDecoder;
use crate::http::encoding::{ContentEncoding, Decoder};
use crate::http::framing::Framing;
use crate::net::ConnIo;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

const SCRATCH: usize = 4096;

enum Delimit {
    Empty,
    Length(u64),
    Chunked(ChunkedDecoder),
    UntilClose,
}

/// Request body as handed to a server handler. Borrows the connection.
pub type Body<'c> = BodyReader<&'c mut ConnIo>;

/// Streams a message body off a buffered connection.
///
/// Layers, innermost first: wire framing (length, chunked or read-to-close),
/// then the content decoder when one is mounted, then the size cap on the
/// bytes handed out.
pub struct BodyReader<S> {
    io: S,
    delimit: Delimit,
    decoder: Option<Decoder>,
    pending: BytesMut,
    limit: Option<u64>,
    produced: u64,
    expect_continue: bool,
    eof: bool,
}

impl<S> BodyReader<S>
where
    S: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    /// A body with nothing to read.
    pub fn empty(io: S) -> Self {
        Self::with_delimit(io, Delimit::Empty)
    }

    /// Mounts a body according to `framing`. Without a length or chunked
    /// framing the body is empty, unless `until_close` is set, in which case
    /// it runs to the end of the stream.
    pub fn new(io: S, framing: &Framing, until_close: bool) -> Self {
        let delimit = if framing.chunked {
            Delimit::Chunked(ChunkedDecoder::new())
        } else if framing.has_length {
            if framing.length == 0 {
                Delimit::Empty
            } else {
                Delimit::Length(framing.length)
            }
        } else if until_close {
            Delimit::UntilClose
        } else {
            Delimit::Empty
        };
        Self::with_delimit(io, delimit)
    }

    fn with_delimit(io: S, delimit: Delimit) -> Self {
        Self {
            io,
            delimit,
            decoder: None,
            pending: BytesMut::new(),
            limit: None,
            produced: 0,
            expect_continue: false,
            eof: false,
        }
    }

    pub fn with_decoder(mut self, encoding: Option<ContentEncoding>) -> Self {
        self.decoder = encoding.map(Decoder::new);
        self
    }

    /// Caps the number of bytes the reader hands out. Going past the cap
    /// fails with `TooLarge(Body)`.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Makes the first read send `100 Continue` before touching the body.
    pub fn with_expect_continue(mut self, expect: bool) -> Self {
        self.expect_continue = expect;
        self
    }

    /// True while the `100 Continue` interim response is still owed.
    pub fn continue_pending(&self) -> bool {
        self.expect_continue && !matches!(self.delimit, Delimit::Empty)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.delimit, Delimit::Empty) && self.pending.is_empty()
    }

    pub fn is_eof(&self) -> bool {
        self.eof && self.pending.is_empty()
    }

    /// Bytes handed out so far.
    pub fn bytes_read(&self) -> u64 {
        self.produced
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.expect_continue {
            self.expect_continue = false;
            if !matches!(self.delimit, Delimit::Empty) {
                self.io.write_all(CONTINUE).await?;
                self.io.flush().await?;
            }
        }
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len());
                buf[..n].copy_from_slice(&self.pending[..n]);
                self.pending.advance(n);
                return self.count(n);
            }
            if self.eof {
                return Ok(0);
            }
            if self.decoder.is_none() {
                let n = self.read_raw(buf).await?;
                if n == 0 {
                    self.eof = true;
                    return Ok(0);
                }
                return self.count(n);
            }

            let mut scratch = [0u8; SCRATCH];
            let n = self.read_raw(&mut scratch).await?;
            let Some(decoder) = self.decoder.as_mut() else {
                continue;
            };
            if n == 0 {
                let tail = decoder.finish()?;
                self.pending.extend_from_slice(&tail);
                self.decoder = None;
                self.eof = true;
            } else {
                let out = decoder.decode(&scratch[..n])?;
                self.pending.extend_from_slice(&out);
            }
        }
    }

    fn count(&mut self, n: usize) -> Result<usize> {
        self.produced += n as u64;
        match self.limit {
            Some(limit) if self.produced > limit => Err(Error::TooLarge(Limit::Body)),
            _ => Ok(n),
        }
    }

    async fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.delimit {
            Delimit::Empty => Ok(0),
            Delimit::Length(remaining) => {
                if *remaining == 0 {
                    return Ok(0);
                }
                let avail = self.io.fill_buf().await?;
                if avail.is_empty() {
                    return Err(unexpected_eof("body"));
                }
                let n = avail.len().min(buf.len()).min(*remaining as usize);
                buf[..n].copy_from_slice(&avail[..n]);
                self.io.consume(n);
                *remaining -= n as u64;
                Ok(n)
            }
            Delimit::Chunked(decoder) => decoder.read(&mut self.io, buf).await,
            Delimit::UntilClose => {
                let avail = self.io.fill_buf().await?;
                let n = avail.len().min(buf.len());
                buf[..n].copy_from_slice(&avail[..n]);
                self.io.consume(n);
                Ok(n)
            }
        }
    }

    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let mut buf = [0u8; SCRATCH];
        let start = out.len();
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out.len() - start);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    pub async fn bytes(&mut self) -> Result<Bytes> {
        let mut out = Vec::new();
        self.read_to_end(&mut out).await?;
        Ok(Bytes::from(out))
    }

    pub async fn read_to_string(&mut self) -> Result<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::other("body is not valid UTF-8"))
    }

    /// Reads and drops the rest of the body. Returns the number of bytes
    /// dropped.
    pub async fn discard(&mut self) -> Result<u64> {
        let mut buf = [0u8; SCRATCH];
        let mut total = 0u64;
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            total += n as u64;
        }
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.io
    }

    pub fn into_inner(self) -> S {
        self.io
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::http::encoding::encode_all;
    use tokio::io::{AsyncReadExt, BufReader};

    fn reader(wire: &[u8], framing: Framing) -> BodyReader<BufReader<std::io::Cursor<Vec<u8>>>> {
        BodyReader::new(BufReader::new(std::io::Cursor::new(wire.to_vec())), &framing, false)
    }

    #[tokio::test]
    async fn fixed_length_stops_at_length() {
        let framing = Framing { chunked: false, length: 5, has_length: true };
        let mut body = reader(b"helloEXTRA", framing);
        assert_eq!(body.read_to_string().await.unwrap(), "hello");
        let mut rest = String::new();
        body.into_inner().read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "EXTRA");
    }

    #[tokio::test]
    async fn short_body_is_eof_error() {
        let framing = Framing { chunked: false, length: 10, has_length: true };
        let err = reader(b"abc", framing).bytes().await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn chunked_then_gzip() {
        let compressed = encode_all(ContentEncoding::Gzip, b"hello world").unwrap();
        let mut wire = format!("{:x}\r\n", compressed.len()).into_bytes();
        wire.extend_from_slice(&compressed);
        wire.extend_from_slice(b"\r\n0\r\n\r\n");
        let framing = Framing { chunked: true, ..Framing::default() };
        let mut body = reader(&wire, framing).with_decoder(Some(ContentEncoding::Gzip));
        assert_eq!(body.read_to_string().await.unwrap(), "hello world");
        assert!(body.is_eof());
    }

    #[tokio::test]
    async fn limit_applies() {
        let framing = Framing { chunked: true, ..Framing::default() };
        let mut body = reader(b"4\r\nabcd\r\n4\r\nefgh\r\n0\r\n\r\n", framing).with_limit(6);
        let err = body.bytes().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooLarge);
    }

    #[tokio::test]
    async fn until_close_reads_everything() {
        let mut body = BodyReader::new(
            BufReader::new(std::io::Cursor::new(b"all of it".to_vec())),
            &Framing::default(),
            true,
        );
        assert_eq!(body.read_to_string().await.unwrap(), "all of it");
    }

    #[tokio::test]
    async fn expect_continue_is_sent_on_first_read() {
        let (client, server) = tokio::io::duplex(256);
        let mut server = BufReader::new(server);
        let framing = Framing { chunked: false, length: 4, has_length: true };
        let mut body = BodyReader::new(&mut server, &framing, false).with_expect_continue(true);
        assert!(body.continue_pending());

        let peer = tokio::spawn(async move {
            let mut client = client;
            let mut got = vec![0u8; CONTINUE.len()];
            client.read_exact(&mut got).await.unwrap();
            tokio::io::AsyncWriteExt::write_all(&mut client, b"data").await.unwrap();
            got
        });
        assert_eq!(body.read_to_string().await.unwrap(), "data");
        assert_eq!(peer.await.unwrap(), CONTINUE);
    }
}
