//! `permessage-deflate` (RFC 7692) with context takeover.
//!
//! Both directions keep one raw-deflate stream for the life of the
//! connection. Every message ends on a sync flush; the `00 00 FF FF` tail
//! of that flush is not sent and is put back before inflating.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Limit, Result};

const SYNC_TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

pub struct Deflater {
    stream: Compress,
}

impl Default for Deflater {
    fn default() -> Self {
        Self::new()
    }
}

impl Deflater {
    pub fn new() -> Self {
        Self {
            stream: Compress::new(Compression::default(), false),
        }
    }

    /// Compresses one message payload.
    pub fn compress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            // An empty stored block once the sync tail is put back.
            return Ok(vec![0x00]);
        }
        let mut out = Vec::with_capacity(data.len() / 2 + 64);
        let mut input = data;
        loop {
            if out.capacity() - out.len() < 64 {
                out.reserve(out.capacity().max(256));
            }
            let before = self.stream.total_in();
            self.stream
                .compress_vec(input, &mut out, FlushCompress::Sync)
                .map_err(|e| Error::protocol(format!("deflate: {e}")))?;
            let consumed = (self.stream.total_in() - before) as usize;
            input = &input[consumed..];
            if input.is_empty() && out.len() < out.capacity() {
                break;
            }
        }
        if out.ends_with(&SYNC_TAIL) {
            out.truncate(out.len() - SYNC_TAIL.len());
        }
        Ok(out)
    }
}

pub struct Inflater {
    stream: Decompress,
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            stream: Decompress::new(false),
        }
    }

    /// Inflates one message payload as received, sync tail stripped.
    /// Output past `limit` bytes fails with `TooLarge`; zero means no limit.
    pub fn decompress(&mut self, data: &[u8], limit: usize) -> Result<Vec<u8>> {
        let mut input = Vec::with_capacity(data.len() + SYNC_TAIL.len());
        input.extend_from_slice(data);
        input.extend_from_slice(&SYNC_TAIL);

        let mut out = Vec::with_capacity(data.len() * 2 + 64);
        let mut pos = 0;
        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(1024));
            }
            let (before_in, before_out) = (self.stream.total_in(), out.len());
            let status = self
                .stream
                .decompress_vec(&input[pos..], &mut out, FlushDecompress::Sync)
                .map_err(|e| Error::protocol(format!("inflate: {e}")))?;
            let consumed = (self.stream.total_in() - before_in) as usize;
            pos += consumed;
            if limit > 0 && out.len() > limit {
                return Err(Error::TooLarge(Limit::Frame));
            }

            if status == Status::StreamEnd {
                break;
            }
            if pos >= input.len() && out.len() < out.capacity() {
                break;
            }
            if consumed == 0 && out.len() == before_out && out.len() < out.capacity() {
                break;
            }
        }
        Ok(out)
    }
}
