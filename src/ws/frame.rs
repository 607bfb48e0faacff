//! RFC 6455 frame header codec and payload masking.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{unexpected_eof, Error, Result};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xa => Some(OpCode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xa,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub length: u64,
}

impl FrameHeader {
    pub fn new(opcode: OpCode, length: u64) -> Self {
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask: None,
            length,
        }
    }

    /// Reads one header. A stream that ends before the first byte yields
    /// `Closed`; one that ends inside the header is an unexpected EOF.
    pub async fn read<R>(r: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut head = [0u8; 2];
        if r.read(&mut head[..1]).await? == 0 {
            return Err(Error::Closed);
        }
        read_exact(r, &mut head[1..]).await?;

        let opcode = OpCode::from_u8(head[0] & 0x0f)
            .ok_or_else(|| Error::protocol(format!("unknown opcode {:#x}", head[0] & 0x0f)))?;
        let masked = head[1] & 0x80 != 0;
        let length = match head[1] & 0x7f {
            126 => {
                let mut ext = [0u8; 2];
                read_exact(r, &mut ext).await?;
                u16::from_be_bytes(ext) as u64
            }
            127 => {
                let mut ext = [0u8; 8];
                read_exact(r, &mut ext).await?;
                let n = u64::from_be_bytes(ext);
                if n & (1 << 63) != 0 {
                    return Err(Error::protocol("frame length has the high bit set"));
                }
                n
            }
            n => n as u64,
        };
        let mask = if masked {
            let mut key = [0u8; 4];
            read_exact(r, &mut key).await?;
            Some(key)
        } else {
            None
        };

        Ok(Self {
            fin: head[0] & 0x80 != 0,
            rsv1: head[0] & 0x40 != 0,
            rsv2: head[0] & 0x20 != 0,
            rsv3: head[0] & 0x10 != 0,
            opcode,
            mask,
            length,
        })
    }

    /// Appends the wire form of the header to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut b0 = self.opcode.as_u8();
        if self.fin {
            b0 |= 0x80;
        }
        if self.rsv1 {
            b0 |= 0x40;
        }
        if self.rsv2 {
            b0 |= 0x20;
        }
        if self.rsv3 {
            b0 |= 0x10;
        }
        buf.put_u8(b0);

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        match self.length {
            n if n < 126 => buf.put_u8(mask_bit | n as u8),
            n if n <= u16::MAX as u64 => {
                buf.put_u8(mask_bit | 126);
                buf.put_u16(n as u16);
            }
            n => {
                buf.put_u8(mask_bit | 127);
                buf.put_u64(n);
            }
        }
        if let Some(key) = self.mask {
            buf.put_slice(&key);
        }
    }

    pub fn has_rsv(&self) -> bool {
        self.rsv1 || self.rsv2 || self.rsv3
    }
}

async fn read_exact<R>(r: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match r.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(unexpected_eof("frame header")),
        Err(e) => Err(e.into()),
    }
}

/// XORs `buf` with the masking key. `offset` is the position of `buf[0]`
/// within the frame payload.
pub fn apply_mask(buf: &mut [u8], key: [u8; 4], offset: usize) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b ^= key[(offset + i) & 3];
    }
}
