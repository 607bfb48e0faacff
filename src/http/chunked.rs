//! `Transfer-Encoding: chunked` codec.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{unexpected_eof, Error, Limit, Part, Result};
use crate::http::line::read_line;

/// Longest chunk-size line accepted, extensions included.
const SIZE_LINE_LIMIT: usize = 4096;

/// Chunked decoding state, driven by [`ChunkedDecoder::read`] over any
/// buffered source. Kept separate from the source so a body reader can
/// borrow the connection only while reading.
#[derive(Debug, Default)]
pub struct ChunkedDecoder {
    remaining: u64,
    need_crlf: bool,
    done: bool,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Reads decoded bytes into `buf`. Returns 0 once the terminating chunk
    /// and its trailer have been consumed.
    pub async fn read<R>(&mut self, r: &mut R, buf: &mut [u8]) -> Result<usize>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.done {
                return Ok(0);
            }
            if self.remaining > 0 {
                let avail = r.fill_buf().await?;
                if avail.is_empty() {
                    return Err(unexpected_eof("chunk"));
                }
                let n = avail.len().min(buf.len()).min(self.remaining as usize);
                buf[..n].copy_from_slice(&avail[..n]);
                r.consume(n);
                self.remaining -= n as u64;
                if self.remaining == 0 {
                    self.need_crlf = true;
                }
                return Ok(n);
            }
            if self.need_crlf {
                let line = read_line(r, 0, Limit::Line).await.map_err(|e| match e {
                    Error::TooLarge(_) => Error::invalid(Part::ChunkSize, "missing CRLF after chunk"),
                    Error::Closed => unexpected_eof("chunk"),
                    other => other,
                })?;
                debug_assert!(line.is_empty());
                self.need_crlf = false;
            }
            let size = self.read_size(r).await?;
            if size == 0 {
                self.read_trailer(r).await?;
                self.done = true;
                return Ok(0);
            }
            self.remaining = size;
        }
    }

    async fn read_size<R>(&mut self, r: &mut R) -> Result<u64>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        let line = read_line(r, SIZE_LINE_LIMIT, Limit::Line)
            .await
            .map_err(|e| match e {
                Error::Closed => unexpected_eof("chunk size"),
                other => other,
            })?;
        let text = String::from_utf8_lossy(&line);
        let size = text.split(';').next().unwrap_or_default().trim();
        if size.is_empty() || size.len() > 16 {
            return Err(Error::invalid(Part::ChunkSize, format!("{text:?}")));
        }
        u64::from_str_radix(size, 16).map_err(|_| Error::invalid(Part::ChunkSize, format!("{text:?}")))
    }

    /// Consumes the trailer after the zero chunk. Trailer fields are
    /// skipped; a stream that ends before the final CRLF fails with
    /// `TrailerEof`.
    async fn read_trailer<R>(&mut self, r: &mut R) -> Result<()>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        loop {
            let line = read_line(r, SIZE_LINE_LIMIT, Limit::Line)
                .await
                .map_err(|e| if e.is_eof() || matches!(e, Error::Closed) { Error::TrailerEof } else { e })?;
            if line.is_empty() {
                return Ok(());
            }
        }
    }
}

/// Owning chunked reader over a buffered source.
pub struct ChunkedReader<R> {
    inner: R,
    decoder: ChunkedDecoder,
}

impl<R: AsyncBufRead + Unpin> ChunkedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decoder: ChunkedDecoder::new(),
        }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.decoder.read(&mut self.inner, buf).await
    }

    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let mut buf = [0u8; 1024];
        let start = out.len();
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out.len() - start);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Chunked encoder over any writer.
pub struct ChunkedWriter<W> {
    inner: W,
    buf: BytesMut,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> ChunkedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            closed: false,
        }
    }

    /// Emits one chunk. Empty writes are dropped: a zero-length chunk would
    /// read as the terminator.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if data.is_empty() {
            return Ok(());
        }
        self.buf.clear();
        self.buf.put_slice(format!("{:x}\r\n", data.len()).as_bytes());
        self.buf.put_slice(data);
        self.buf.put_slice(b"\r\n");
        self.inner.write_all(&self.buf).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Writes the `0\r\n\r\n` terminator and flushes. Closing twice is a
    /// no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.write_all(b"0\r\n\r\n").await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    async fn encode(data: &[u8], piece: usize) -> Vec<u8> {
        let mut w = ChunkedWriter::new(Vec::new());
        for part in data.chunks(piece) {
            w.write(part).await.unwrap();
        }
        w.write(b"").await.unwrap();
        w.close().await.unwrap();
        w.into_inner()
    }

    #[tokio::test]
    async fn writer_format() {
        assert_eq!(encode(b"hello world", 11).await, b"b\r\nhello world\r\n0\r\n\r\n");
    }

    #[tokio::test]
    async fn round_trip_any_piece_size() {
        let data: Vec<u8> = (0..300u32).map(|i| (i * 7) as u8).collect();
        for piece in [1, 2, 17, 255, 300] {
            let wire = encode(&data, piece).await;
            let mut r = ChunkedReader::new(&wire[..]);
            let mut out = Vec::new();
            r.read_to_end(&mut out).await.unwrap();
            assert_eq!(out, data, "piece size {piece}");
        }
    }

    #[tokio::test]
    async fn skips_extensions_and_trailers() {
        let wire: &[u8] = b"4;name=v\r\nhell\r\n2\r\no \r\n5\r\nworld\r\n0\r\nX-Trailer: 1\r\n\r\nNEXT";
        let mut r = ChunkedReader::new(wire);
        let mut out = Vec::new();
        r.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
        assert_eq!(r.into_inner(), b"NEXT");
    }

    #[tokio::test]
    async fn missing_trailer_is_trailer_eof() {
        let mut r = ChunkedReader::new(&b"3\r\nabc\r\n0\r\n"[..]);
        let mut out = Vec::new();
        let err = r.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TrailerEof);
    }

    #[tokio::test]
    async fn bad_size_line() {
        let mut r = ChunkedReader::new(&b"zz\r\nabc\r\n0\r\n\r\n"[..]);
        let mut out = Vec::new();
        let err = r.read_to_end(&mut out).await.unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { part: Part::ChunkSize, .. }));
    }

    #[tokio::test]
    async fn reads_after_end_return_zero() {
        let mut r = ChunkedReader::new(&b"0\r\n\r\n"[..]);
        let mut buf = [0u8; 8];
        assert_eq!(r.read(&mut buf).await.unwrap(), 0);
        assert_eq!(r.read(&mut buf).await.unwrap(), 0);
    }
}
