//! WebSocket frame handler.
//!
//! Reads and writes are serialized separately: a [`MessageReader`] holds
//! the read lock for the whole message while writers queue on the write
//! lock. Control frames that arrive between data frames are handled inline
//! by the reader: pings are answered, pongs dropped, and a close marks the
//! connection dead.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{unexpected_eof, Error, Limit, Result};
use crate::net::ConnIo;
use crate::ws::deflate::{Deflater, Inflater};
use crate::ws::frame::{apply_mask, FrameHeader, OpCode, MAX_CONTROL_PAYLOAD};

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_NO_STATUS: u16 = 1005;
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
pub const CLOSE_TOO_BIG: u16 = 1009;

const SCRATCH: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Per-connection settings, fixed at handshake time.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsOptions {
    /// `permessage-deflate` was negotiated.
    pub compression: bool,
    /// Largest accepted frame payload; zero disables the limit. Outgoing
    /// messages are fragmented to this size.
    pub max_frame_size: u64,
    /// Largest accepted message, after inflating and across fragments; zero
    /// disables the limit.
    pub max_message_size: u64,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

/// The message a run of data frames belongs to.
#[derive(Debug, Clone, Copy)]
struct Message {
    opcode: OpCode,
    compressed: bool,
    /// The frame being read is the message's last.
    fin: bool,
}

struct ReadState {
    io: ReadHalf<ConnIo>,
    message: Option<Message>,
    remaining: u64,
    mask: Option<[u8; 4]>,
    mask_offset: usize,
    inflater: Option<Inflater>,
}

struct WriteState {
    io: WriteHalf<ConnIo>,
    deflater: Option<Deflater>,
    buf: BytesMut,
    close_sent: bool,
}

pub struct WsConn {
    role: Role,
    opts: WsOptions,
    reader: Mutex<ReadState>,
    writer: Mutex<WriteState>,
    dead: AtomicBool,
}

async fn timed<F, T, E>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<Error>,
{
    match limit {
        Some(d) => match tokio::time::timeout(d, fut).await {
            Ok(res) => res.map_err(Into::into),
            Err(_) => Err(Error::Timeout),
        },
        None => fut.await.map_err(Into::into),
    }
}

impl WsConn {
    pub fn new(io: ConnIo, role: Role, opts: WsOptions) -> Self {
        let (rd, wr) = tokio::io::split(io);
        Self {
            role,
            opts,
            reader: Mutex::new(ReadState {
                io: rd,
                message: None,
                remaining: 0,
                mask: None,
                mask_offset: 0,
                inflater: opts.compression.then(Inflater::new),
            }),
            writer: Mutex::new(WriteState {
                io: wr,
                deflater: opts.compression.then(Deflater::new),
                buf: BytesMut::with_capacity(SCRATCH),
                close_sent: false,
            }),
            dead: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn compression(&self) -> bool {
        self.opts.compression
    }

    /// True once a close frame was sent or received.
    pub fn is_closed(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Waits for the next text or binary message and returns a reader for
    /// its payload. An unfinished previous message is skipped first.
    pub async fn next_reader(&self) -> Result<MessageReader<'_>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let mut st = self.reader.lock().await;
        if st.message.is_some() {
            let mut leftover = MessageReader::new(self, st);
            leftover.discard().await?;
            st = leftover.st;
        }

        let header = self.next_frame(&mut st, false).await?;
        st.message = Some(Message {
            opcode: header.opcode,
            compressed: header.rsv1,
            fin: header.fin,
        });
        st.remaining = header.length;
        st.mask = header.mask;
        st.mask_offset = 0;
        tracing::trace!(opcode = ?header.opcode, len = header.length, fin = header.fin, "message start");
        Ok(MessageReader::new(self, st))
    }

    /// Reads a whole text or binary message.
    pub async fn read_message(&self) -> Result<(OpCode, Vec<u8>)> {
        let mut reader = self.next_reader().await?;
        let mut payload = Vec::new();
        reader.read_to_end(&mut payload).await?;
        Ok((reader.opcode(), payload))
    }

    /// Reads headers until a data frame shows up, answering control frames
    /// on the way. `in_message` says whether a continuation is expected.
    async fn next_frame(&self, st: &mut ReadState, in_message: bool) -> Result<FrameHeader> {
        loop {
            let header = timed(self.opts.read_timeout, FrameHeader::read(&mut st.io)).await?;
            self.police(&header).await?;
            tracing::trace!(opcode = ?header.opcode, len = header.length, fin = header.fin, "frame");

            match header.opcode {
                OpCode::Ping => {
                    let payload = self.read_control_payload(st, &header).await?;
                    if !self.is_closed() {
                        self.write_frame(OpCode::Pong, &payload).await?;
                    }
                }
                OpCode::Pong => {
                    self.read_control_payload(st, &header).await?;
                }
                OpCode::Close => {
                    let payload = self.read_control_payload(st, &header).await?;
                    let code = match payload.get(..2) {
                        Some(b) => u16::from_be_bytes([b[0], b[1]]),
                        None => CLOSE_NO_STATUS,
                    };
                    tracing::debug!(code, "close frame received");
                    self.dead.store(true, Ordering::Release);
                    let echo = if code == CLOSE_NO_STATUS { None } else { Some(code) };
                    let _ = self.send_close(echo).await;
                    return Err(Error::Closed);
                }
                OpCode::Continuation if !in_message => {
                    return Err(self
                        .fail(CLOSE_PROTOCOL_ERROR, Error::protocol("continuation frame outside a message"))
                        .await);
                }
                OpCode::Text | OpCode::Binary if in_message => {
                    return Err(self
                        .fail(CLOSE_PROTOCOL_ERROR, Error::protocol("new message inside a fragmented message"))
                        .await);
                }
                _ => return Ok(header),
            }
        }
    }

    /// Checks masking, size and reserved bits.
    async fn police(&self, header: &FrameHeader) -> Result<()> {
        let masked = header.mask.is_some();
        match self.role {
            Role::Server if !masked => {
                return Err(self.fail(CLOSE_PROTOCOL_ERROR, Error::protocol("unmasked client frame")).await);
            }
            Role::Client if masked => {
                return Err(self.fail(CLOSE_PROTOCOL_ERROR, Error::protocol("masked server frame")).await);
            }
            _ => {}
        }
        if self.opts.max_frame_size > 0 && header.length > self.opts.max_frame_size {
            return Err(self.fail(CLOSE_TOO_BIG, Error::TooLarge(Limit::Frame)).await);
        }
        if header.opcode.is_control() {
            if !header.fin || header.has_rsv() || header.length > MAX_CONTROL_PAYLOAD {
                return Err(self.fail(CLOSE_PROTOCOL_ERROR, Error::protocol("malformed control frame")).await);
            }
            return Ok(());
        }
        if header.rsv2 || header.rsv3 {
            return Err(self.fail(CLOSE_PROTOCOL_ERROR, Error::protocol("reserved bits set")).await);
        }
        if header.rsv1 && (header.opcode == OpCode::Continuation || !self.opts.compression) {
            return Err(self.fail(CLOSE_PROTOCOL_ERROR, Error::protocol("unexpected RSV1")).await);
        }
        Ok(())
    }

    async fn read_control_payload(&self, st: &mut ReadState, header: &FrameHeader) -> Result<Vec<u8>> {
        let mut payload = vec![0u8; header.length as usize];
        timed(self.opts.read_timeout, st.io.read_exact(&mut payload))
            .await
            .map_err(|e| if e.is_eof() { unexpected_eof("control frame") } else { e })?;
        if let Some(key) = header.mask {
            apply_mask(&mut payload, key, 0);
        }
        Ok(payload)
    }

    /// Sends a close with `code`, marks the connection dead and hands back
    /// `err`.
    async fn fail(&self, code: u16, err: Error) -> Error {
        tracing::debug!(code, %err, "closing websocket on protocol error");
        self.dead.store(true, Ordering::Release);
        let _ = self.send_close(Some(code)).await;
        err
    }

    /// Writes one frame, unfragmented and uncompressed.
    pub async fn write_frame(&self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        if opcode.is_control() && payload.len() as u64 > MAX_CONTROL_PAYLOAD {
            return Err(Error::protocol("control frame payload over 125 bytes"));
        }
        let mut st = self.writer.lock().await;
        if st.close_sent {
            return Err(Error::Closed);
        }
        self.put_frame(&mut st, FrameHeader::new(opcode, payload.len() as u64), payload);
        self.flush(&mut st).await
    }

    /// Writes a whole message, compressed when negotiated and split into
    /// frames of at most `max_frame_size` bytes.
    pub async fn write_message(&self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        if opcode.is_control() {
            return self.write_frame(opcode, payload).await;
        }
        if opcode == OpCode::Continuation {
            return Err(Error::protocol("a message cannot start with a continuation frame"));
        }
        let mut st = self.writer.lock().await;
        if st.close_sent {
            return Err(Error::Closed);
        }

        let compressed;
        let data = match st.deflater.as_mut() {
            Some(deflater) => {
                compressed = true;
                std::borrow::Cow::Owned(deflater.compress(payload)?)
            }
            None => {
                compressed = false;
                std::borrow::Cow::Borrowed(payload)
            }
        };

        let step = match self.opts.max_frame_size {
            0 => data.len().max(1),
            n => n as usize,
        };
        let mut pieces: Vec<&[u8]> = data.chunks(step).collect();
        if pieces.is_empty() {
            pieces.push(&[]);
        }
        let last = pieces.len() - 1;
        for (i, piece) in pieces.into_iter().enumerate() {
            let mut header = FrameHeader::new(
                if i == 0 { opcode } else { OpCode::Continuation },
                piece.len() as u64,
            );
            header.fin = i == last;
            header.rsv1 = compressed && i == 0;
            self.put_frame(&mut st, header, piece);
            if st.buf.len() >= SCRATCH {
                self.flush(&mut st).await?;
            }
        }
        self.flush(&mut st).await
    }

    pub async fn ping(&self, payload: &[u8]) -> Result<()> {
        self.write_frame(OpCode::Ping, payload).await
    }

    /// Sends a close frame with `code` and marks the connection dead.
    pub async fn write_close(&self, code: u16) -> Result<()> {
        self.dead.store(true, Ordering::Release);
        self.send_close(Some(code)).await
    }

    /// Sends a normal close and shuts the write side down.
    pub async fn close(&self) -> Result<()> {
        let res = self.write_close(CLOSE_NORMAL).await;
        let mut st = self.writer.lock().await;
        let _ = st.io.shutdown().await;
        res
    }

    async fn send_close(&self, code: Option<u16>) -> Result<()> {
        let mut st = self.writer.lock().await;
        if st.close_sent {
            return Ok(());
        }
        st.close_sent = true;
        let bytes = code.map(u16::to_be_bytes);
        let payload: &[u8] = match &bytes {
            Some(b) => b,
            None => &[],
        };
        self.put_frame(&mut st, FrameHeader::new(OpCode::Close, payload.len() as u64), payload);
        self.flush(&mut st).await
    }

    /// Queues a frame in the write buffer, masking it in the client role.
    fn put_frame(&self, st: &mut WriteState, mut header: FrameHeader, payload: &[u8]) {
        if self.role == Role::Client {
            header.mask = Some(rand::random::<[u8; 4]>());
        }
        header.encode(&mut st.buf);
        let start = st.buf.len();
        st.buf.extend_from_slice(payload);
        if let Some(key) = header.mask {
            apply_mask(&mut st.buf[start..], key, 0);
        }
    }

    async fn flush(&self, st: &mut WriteState) -> Result<()> {
        let WriteState { io, buf, .. } = st;
        let res = timed(self.opts.write_timeout, async {
            io.write_all(buf).await?;
            io.flush().await
        })
        .await;
        buf.clear();
        res
    }
}

/// Reader for one message's payload, across its fragments.
///
/// Holds the connection's read lock until dropped.
pub struct MessageReader<'a> {
    conn: &'a WsConn,
    st: MutexGuard<'a, ReadState>,
    opcode: OpCode,
    pending: Vec<u8>,
    pending_pos: usize,
    received: u64,
}

impl<'a> MessageReader<'a> {
    fn new(conn: &'a WsConn, st: MutexGuard<'a, ReadState>) -> Self {
        let opcode = st.message.map(|m| m.opcode).unwrap_or(OpCode::Binary);
        Self {
            conn,
            st,
            opcode,
            pending: Vec::new(),
            pending_pos: 0,
            received: 0,
        }
    }

    /// `Text` or `Binary`.
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pending_pos < self.pending.len() {
                let n = (self.pending.len() - self.pending_pos).min(buf.len());
                buf[..n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
                self.pending_pos += n;
                return Ok(n);
            }
            let Some(message) = self.st.message else {
                return Ok(0);
            };
            if message.compressed {
                let raw = self.collect().await?;
                let limit = self.conn.opts.max_message_size as usize;
                let inflater = self
                    .st
                    .inflater
                    .as_mut()
                    .ok_or_else(|| Error::protocol("compressed frame without permessage-deflate"))?;
                let inflated = inflater.decompress(&raw, limit);
                self.pending = match inflated {
                    Ok(payload) => payload,
                    Err(Error::TooLarge(_)) => return Err(self.too_big().await),
                    Err(err) => return Err(err),
                };
                self.pending_pos = 0;
                continue;
            }
            if self.st.remaining > 0 {
                let n = self.read_frame_payload(buf).await?;
                self.received += n as u64;
                if self.over_budget(self.received) {
                    return Err(self.too_big().await);
                }
                return Ok(n);
            }
            if message.fin {
                self.st.message = None;
                return Ok(0);
            }
            self.next_fragment().await?;
        }
    }

    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let start = out.len();
        let mut buf = [0u8; SCRATCH];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out.len() - start);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Reads and drops the rest of the message.
    pub async fn discard(&mut self) -> Result<()> {
        let mut buf = [0u8; SCRATCH];
        while self.read(&mut buf).await? > 0 {}
        Ok(())
    }

    async fn read_frame_payload(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = (self.st.remaining.min(buf.len() as u64)) as usize;
        let st = &mut *self.st;
        let n = timed(self.conn.opts.read_timeout, st.io.read(&mut buf[..want])).await?;
        if n == 0 {
            return Err(unexpected_eof("frame payload"));
        }
        if let Some(key) = st.mask {
            apply_mask(&mut buf[..n], key, st.mask_offset);
        }
        st.mask_offset += n;
        st.remaining -= n as u64;
        Ok(n)
    }

    async fn next_fragment(&mut self) -> Result<()> {
        let header = self.conn.next_frame(&mut self.st, true).await?;
        let st = &mut *self.st;
        if let Some(message) = st.message.as_mut() {
            message.fin = header.fin;
        }
        st.remaining = header.length;
        st.mask = header.mask;
        st.mask_offset = 0;
        Ok(())
    }

    fn over_budget(&self, len: u64) -> bool {
        let max = self.conn.opts.max_message_size;
        max > 0 && len > max
    }

    /// Abandons the message and closes the connection with 1009.
    async fn too_big(&mut self) -> Error {
        self.st.message = None;
        self.conn.fail(CLOSE_TOO_BIG, Error::TooLarge(Limit::Frame)).await
    }

    /// Pulls the raw payload of every remaining fragment.
    async fn collect(&mut self) -> Result<Vec<u8>> {
        let mut raw = Vec::new();
        let mut buf = [0u8; SCRATCH];
        loop {
            while self.st.remaining > 0 {
                let n = self.read_frame_payload(&mut buf).await?;
                raw.extend_from_slice(&buf[..n]);
                if self.over_budget(raw.len() as u64) {
                    return Err(self.too_big().await);
                }
            }
            let fin = self.st.message.is_none_or(|m| m.fin);
            if fin {
                self.st.message = None;
                return Ok(raw);
            }
            self.next_fragment().await?;
        }
    }
}
