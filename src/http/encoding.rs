//! `Content-Encoding` codecs: gzip, deflate (zlib) and brotli.
//!
//! Both directions are push-based: callers feed bytes in and collect
//! whatever output the codec has produced so far. That lets the same codec
//! sit between a body source and a chunked or raw sink without owning
//! either.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use flate2::Compression;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
    Brotli,
}

impl ContentEncoding {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(ContentEncoding::Gzip),
            "deflate" => Some(ContentEncoding::Deflate),
            "br" => Some(ContentEncoding::Brotli),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Brotli => "br",
        }
    }

    /// Reads a `Content-Encoding` value. Absent, empty and `identity` mean no
    /// decoding; anything else unknown is an error.
    pub fn parse_header(value: Option<&str>) -> Result<Option<Self>> {
        let Some(value) = value.map(str::trim) else {
            return Ok(None);
        };
        if value.is_empty() || value.eq_ignore_ascii_case("identity") {
            return Ok(None);
        }
        Self::from_name(value)
            .map(Some)
            .ok_or_else(|| Error::UnknownContentEncoding(value.to_string()))
    }

    /// First known coding listed in an `Accept-Encoding` value. Quality
    /// parameters are ignored.
    pub fn negotiate(accept: &str) -> Option<Self> {
        accept
            .split(',')
            .map(|item| item.split(';').next().unwrap_or_default())
            .find_map(Self::from_name)
    }

    pub fn encoder(&self) -> Encoder {
        Encoder::new(*self)
    }

    pub fn decoder(&self) -> Decoder {
        Decoder::new(*self)
    }
}

impl fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `io::Write` sink shared between a brotli stream and its owner, so output
/// can be drained while the stream is still open.
#[derive(Clone, Default)]
struct Shared(Arc<Mutex<Vec<u8>>>);

impl Shared {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

impl Write for Shared {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 5;
const BROTLI_LGWIN: u32 = 22;

enum EncoderKind {
    Gzip(flate2::write::GzEncoder<Vec<u8>>),
    Deflate(flate2::write::ZlibEncoder<Vec<u8>>),
    Brotli(Box<brotli::CompressorWriter<Shared>>, Shared),
}

/// Streaming compressor.
pub struct Encoder {
    encoding: ContentEncoding,
    kind: Option<EncoderKind>,
}

impl Encoder {
    pub fn new(encoding: ContentEncoding) -> Self {
        let kind = match encoding {
            ContentEncoding::Gzip => {
                EncoderKind::Gzip(flate2::write::GzEncoder::new(Vec::new(), Compression::default()))
            }
            ContentEncoding::Deflate => EncoderKind::Deflate(flate2::write::ZlibEncoder::new(
                Vec::new(),
                Compression::default(),
            )),
            ContentEncoding::Brotli => {
                let sink = Shared::default();
                let w = brotli::CompressorWriter::new(sink.clone(), BROTLI_BUFFER, BROTLI_QUALITY, BROTLI_LGWIN);
                EncoderKind::Brotli(Box::new(w), sink)
            }
        };
        Self {
            encoding,
            kind: Some(kind),
        }
    }

    pub fn encoding(&self) -> ContentEncoding {
        self.encoding
    }

    /// Compresses `data`, returning any output ready so far.
    pub fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match self.kind.as_mut().ok_or(Error::Closed)? {
            EncoderKind::Gzip(w) => {
                w.write_all(data)?;
                Ok(std::mem::take(w.get_mut()))
            }
            EncoderKind::Deflate(w) => {
                w.write_all(data)?;
                Ok(std::mem::take(w.get_mut()))
            }
            EncoderKind::Brotli(w, sink) => {
                w.write_all(data)?;
                Ok(sink.take())
            }
        }
    }

    /// Ends the stream and returns the remaining output.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        match self.kind.take().ok_or(Error::Closed)? {
            EncoderKind::Gzip(w) => Ok(w.finish()?),
            EncoderKind::Deflate(w) => Ok(w.finish()?),
            EncoderKind::Brotli(w, sink) => {
                drop(w.into_inner());
                Ok(sink.take())
            }
        }
    }
}

/// Compresses a whole buffer in one go.
pub fn encode_all(encoding: ContentEncoding, data: &[u8]) -> Result<Vec<u8>> {
    let mut enc = Encoder::new(encoding);
    let mut out = enc.encode(data)?;
    out.extend(enc.finish()?);
    Ok(out)
}

enum DecoderKind {
    Gzip(flate2::write::GzDecoder<Vec<u8>>),
    Deflate(flate2::write::ZlibDecoder<Vec<u8>>),
    Brotli(Box<brotli::DecompressorWriter<Shared>>, Shared),
}

/// Streaming decompressor.
pub struct Decoder {
    encoding: ContentEncoding,
    kind: Option<DecoderKind>,
}

impl Decoder {
    pub fn new(encoding: ContentEncoding) -> Self {
        let kind = match encoding {
            ContentEncoding::Gzip => DecoderKind::Gzip(flate2::write::GzDecoder::new(Vec::new())),
            ContentEncoding::Deflate => DecoderKind::Deflate(flate2::write::ZlibDecoder::new(Vec::new())),
            ContentEncoding::Brotli => {
                let sink = Shared::default();
                let w = brotli::DecompressorWriter::new(sink.clone(), BROTLI_BUFFER);
                DecoderKind::Brotli(Box::new(w), sink)
            }
        };
        Self {
            encoding,
            kind: Some(kind),
        }
    }

    pub fn encoding(&self) -> ContentEncoding {
        self.encoding
    }

    /// Feeds compressed bytes, returning whatever has been decompressed.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        match self.kind.as_mut().ok_or(Error::Closed)? {
            DecoderKind::Gzip(w) => {
                w.write_all(data)?;
                Ok(std::mem::take(w.get_mut()))
            }
            DecoderKind::Deflate(w) => {
                w.write_all(data)?;
                Ok(std::mem::take(w.get_mut()))
            }
            DecoderKind::Brotli(w, sink) => {
                w.write_all(data)?;
                w.flush()?;
                Ok(sink.take())
            }
        }
    }

    /// Signals end of input. Fails when the compressed stream is truncated.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        match self.kind.take().ok_or(Error::Closed)? {
            DecoderKind::Gzip(mut w) => {
                w.try_finish()?;
                Ok(std::mem::take(w.get_mut()))
            }
            DecoderKind::Deflate(mut w) => {
                w.try_finish()?;
                Ok(std::mem::take(w.get_mut()))
            }
            DecoderKind::Brotli(w, sink) => match w.into_inner() {
                Ok(_) => Ok(sink.take()),
                Err(_) => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated brotli stream").into()),
            },
        }
    }
}

/// Decompresses a whole buffer in one go.
pub fn decode_all(encoding: ContentEncoding, data: &[u8]) -> Result<Vec<u8>> {
    let mut dec = Decoder::new(encoding);
    let mut out = dec.decode(data)?;
    out.extend(dec.finish()?);
    Ok(out)
}
