//! Frame layout and stream framing.
//!
//! # Wire Format
//!
//! ```text
//! offset size field
//! 0      2    magic      "RV"
//! 2      1    version    0x01
//! 3      1    kind       FrameKind
//! 4      1    security   SecurityMode
//! 5      1    flags      bit0 = body gzip-compressed before sealing
//! 6      4    sequence   u32 LE, sender frame counter
//! 10     4    body_len   u32 LE
//! 14     4    crc32      u32 LE, over the body as sent
//! 18     N    body
//! ```
//!
//! Bytes `0..14` are the associated data for HMAC/AEAD sealing, so every
//! header field except the CRC is authenticated.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Result, RobovacError};

/// Frame magic
pub const MAGIC: [u8; 2] = *b"RV";

/// Wire format version
pub const WIRE_VERSION: u8 = 0x01;

/// Fixed header size
pub const HEADER_SIZE: usize = 18;

/// Authenticated header prefix size
pub const AAD_SIZE: usize = 14;

/// Body was gzip-compressed before sealing
pub const FLAG_GZIP: u8 = 0x01;

/// Frame kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Client handshake request
    Hello = 0x01,
    /// Device handshake acceptance
    HelloAck = 0x02,
    /// Device handshake refusal
    HelloReject = 0x03,
    /// Command request
    Request = 0x10,
    /// Command response
    Response = 0x11,
    /// Unsolicited device event
    Event = 0x20,
    /// Part of a chunked map transfer
    MapChunk = 0x21,
    /// Heartbeat request
    Ping = 0x30,
    /// Heartbeat reply
    Pong = 0x31,
    /// Orderly session close
    Close = 0x3F,
}

impl FrameKind {
    /// Parse from the wire byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::HelloAck),
            0x03 => Some(Self::HelloReject),
            0x10 => Some(Self::Request),
            0x11 => Some(Self::Response),
            0x20 => Some(Self::Event),
            0x21 => Some(Self::MapChunk),
            0x30 => Some(Self::Ping),
            0x31 => Some(Self::Pong),
            0x3F => Some(Self::Close),
            _ => None,
        }
    }

    /// Wire byte
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Frames exchanged before a session key exists
    pub fn is_handshake(self) -> bool {
        matches!(self, Self::Hello | Self::HelloAck | Self::HelloReject)
    }
}

/// Frame protection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SecurityMode {
    /// Unprotected. Never accepted on a live session.
    None = 0x00,
    /// HMAC-SHA256 tag appended
    Hmac = 0x01,
    /// ChaCha20-Poly1305 sealed
    Aead = 0x02,
}

impl SecurityMode {
    /// Parse from the wire byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::None),
            0x01 => Some(Self::Hmac),
            0x02 => Some(Self::Aead),
            _ => None,
        }
    }
}

/// Fixed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame kind
    pub kind: FrameKind,
    /// Protection applied to the body
    pub security: SecurityMode,
    /// Flag bits
    pub flags: u8,
    /// Sender frame counter
    pub sequence: u32,
    /// Body length
    pub body_len: u32,
    /// CRC32 of the body
    pub crc: u32,
}

impl FrameHeader {
    /// Authenticated header prefix (everything but the CRC)
    pub fn aad(&self) -> [u8; AAD_SIZE] {
        let mut out = [0u8; AAD_SIZE];
        out[0..2].copy_from_slice(&MAGIC);
        out[2] = WIRE_VERSION;
        out[3] = self.kind.as_u8();
        out[4] = self.security as u8;
        out[5] = self.flags;
        out[6..10].copy_from_slice(&self.sequence.to_le_bytes());
        out[10..14].copy_from_slice(&self.body_len.to_le_bytes());
        out
    }

    /// Whether the body was compressed before sealing
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_GZIP != 0
    }

    fn write(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.aad());
        dst.put_u32_le(self.crc);
    }
}

/// A framed but still sealed body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Header as received or to be sent
    pub header: FrameHeader,
    /// Sealed body
    pub body: Bytes,
}

impl RawFrame {
    /// Build a frame; `body_len` and `crc` are taken from `body`
    pub fn new(mut header: FrameHeader, body: Bytes) -> Self {
        header.body_len = body.len() as u32;
        header.crc = crc32fast::hash(&body);
        Self { header, body }
    }

    /// Encoded frame size
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// Encode to a contiguous buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.header.write(&mut buf);
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

/// Length-delimited frame codec.
///
/// Works on any byte stream: chunk boundaries from the transport do not
/// need to match frame boundaries.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec that rejects bodies above `max_frame_size`
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Configured body cap
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

/// Drop bytes up to the next plausible frame start.
fn resync(src: &mut BytesMut) {
    let next = src[1..]
        .windows(MAGIC.len())
        .position(|w| w == MAGIC)
        .map(|pos| pos + 1);
    match next {
        Some(pos) => src.advance(pos),
        None => {
            // Keep a trailing 'R' in case the magic straddles reads
            let keep = usize::from(src.last() == Some(&MAGIC[0]));
            let drop = src.len() - keep;
            src.advance(drop);
        }
    }
}

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = RobovacError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RawFrame>> {
        if src.len() < HEADER_SIZE {
            src.reserve(HEADER_SIZE - src.len());
            return Ok(None);
        }

        if src[0..2] != MAGIC {
            resync(src);
            return Err(RobovacError::Decode("Invalid frame magic".to_string()));
        }
        if src[2] != WIRE_VERSION {
            let version = src[2];
            resync(src);
            return Err(RobovacError::Decode(format!(
                "Unsupported wire version {version}"
            )));
        }

        let body_len = u32::from_le_bytes([src[10], src[11], src[12], src[13]]) as usize;
        if body_len > self.max_frame_size {
            src.clear();
            return Err(RobovacError::FrameTooLarge {
                size: body_len,
                max: self.max_frame_size,
            });
        }

        let total = HEADER_SIZE + body_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        let kind_byte = frame[3];
        let security_byte = frame[4];
        let flags = frame[5];
        frame.advance(6);
        let sequence = frame.get_u32_le();
        let _ = frame.get_u32_le();
        let crc = frame.get_u32_le();
        let body = frame.freeze();

        let kind = FrameKind::from_u8(kind_byte)
            .ok_or_else(|| RobovacError::Decode(format!("Unknown frame kind 0x{kind_byte:02x}")))?;
        let security = SecurityMode::from_u8(security_byte).ok_or_else(|| {
            RobovacError::Decode(format!("Unknown security mode 0x{security_byte:02x}"))
        })?;

        let computed = crc32fast::hash(&body);
        if computed != crc {
            return Err(RobovacError::Decode(format!(
                "Checksum mismatch: expected {crc:08x}, got {computed:08x}"
            )));
        }

        Ok(Some(RawFrame {
            header: FrameHeader {
                kind,
                security,
                flags,
                sequence,
                body_len: body_len as u32,
                crc,
            },
            body,
        }))
    }
}

impl Encoder<RawFrame> for FrameCodec {
    type Error = RobovacError;

    fn encode(&mut self, item: RawFrame, dst: &mut BytesMut) -> Result<()> {
        if item.body.len() > self.max_frame_size {
            return Err(RobovacError::FrameTooLarge {
                size: item.body.len(),
                max: self.max_frame_size,
            });
        }
        dst.reserve(item.encoded_len());
        item.header.write(dst);
        dst.put_slice(&item.body);
        Ok(())
    }
}
