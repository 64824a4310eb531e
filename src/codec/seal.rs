//! Frame sealing and opening.
//!
//! A [`FrameSealer`] owns the keys of one connection. It starts in
//! handshake mode (HMAC with the handshake key) and is upgraded to session
//! mode (AEAD with the negotiated session key) once the handshake
//! completes. Each mode accepts exactly one security mode on input: a frame
//! in any other mode is rejected, never passed through.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::compress::{gunzip, gzip};
use super::crypto::{
    handshake_key, AeadCipher, CryptoError, HmacAuth, KeyMaterial, HMAC_TAG_SIZE,
};
use super::frame::{FrameHeader, FrameKind, RawFrame, SecurityMode, FLAG_GZIP};
use crate::config::CodecConfig;
use crate::error::{Result, RobovacError};

/// A decoded, authenticated frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind
    pub kind: FrameKind,
    /// Sender sequence number
    pub sequence: u32,
    /// Plaintext payload
    pub payload: Bytes,
}

impl Frame {
    /// Decode the payload as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| RobovacError::Decode(format!("Invalid {:?} payload: {e}", self.kind)))
    }
}

/// Compression and size limits applied while sealing/opening
#[derive(Debug, Clone, Copy)]
pub struct SealOptions {
    /// Compress payloads at least this large
    pub compression_threshold: usize,
    /// Refuse to inflate bodies beyond this size
    pub max_payload: usize,
}

impl Default for SealOptions {
    fn default() -> Self {
        Self::from(&CodecConfig::default())
    }
}

impl From<&CodecConfig> for SealOptions {
    fn from(config: &CodecConfig) -> Self {
        Self {
            compression_threshold: config.compression_threshold,
            max_payload: config.max_map_size.max(config.max_frame_size),
        }
    }
}

enum Protection {
    Handshake(HmacAuth),
    Session(AeadCipher),
}

/// Seals outbound frames and opens inbound ones for one connection
pub struct FrameSealer {
    protection: Protection,
    next_sequence: u32,
    options: SealOptions,
}

impl FrameSealer {
    /// Sealer in handshake mode, keyed from the device local key
    pub fn handshake(local_key: &KeyMaterial, options: SealOptions) -> Result<Self> {
        let key = handshake_key(local_key)?;
        let auth = HmacAuth::new(key).map_err(CryptoError::from)?;
        Ok(Self {
            protection: Protection::Handshake(auth),
            next_sequence: 0,
            options,
        })
    }

    /// Switch to session mode. The sequence counter carries over.
    pub fn upgrade(&mut self, session_key: &KeyMaterial) -> Result<()> {
        let cipher = AeadCipher::new(session_key).map_err(CryptoError::from)?;
        self.protection = Protection::Session(cipher);
        Ok(())
    }

    /// Security mode used for outbound frames and required of inbound ones
    pub fn mode(&self) -> SecurityMode {
        match self.protection {
            Protection::Handshake(_) => SecurityMode::Hmac,
            Protection::Session(_) => SecurityMode::Aead,
        }
    }

    /// Whether the handshake has completed
    pub fn is_established(&self) -> bool {
        matches!(self.protection, Protection::Session(_))
    }

    /// Seal a payload into a frame
    pub fn seal(&mut self, kind: FrameKind, payload: &[u8]) -> Result<RawFrame> {
        self.check_kind(kind)?;

        let mut flags = 0;
        let mut body = None;
        if payload.len() >= self.options.compression_threshold && kind != FrameKind::MapChunk {
            let packed = gzip(payload)?;
            if packed.len() < payload.len() {
                flags |= FLAG_GZIP;
                body = Some(packed);
            }
        }
        let body = body.as_deref().unwrap_or(payload);

        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let sealed_len = match &self.protection {
            Protection::Handshake(_) => body.len() + HMAC_TAG_SIZE,
            Protection::Session(_) => AeadCipher::sealed_len(body.len()),
        };
        let header = FrameHeader {
            kind,
            security: self.mode(),
            flags,
            sequence,
            body_len: sealed_len as u32,
            crc: 0,
        };
        let aad = header.aad();

        let sealed = match &self.protection {
            Protection::Handshake(auth) => auth.sign(body, &aad).map_err(CryptoError::from)?,
            Protection::Session(cipher) => cipher.encrypt(body, &aad).map_err(CryptoError::from)?,
        };
        Ok(RawFrame::new(header, Bytes::from(sealed)))
    }

    /// Serialize `value` as JSON and seal it
    pub fn seal_json<T: Serialize>(&mut self, kind: FrameKind, value: &T) -> Result<RawFrame> {
        let payload = serde_json::to_vec(value)?;
        self.seal(kind, &payload)
    }

    /// Verify, decrypt and decompress an inbound frame
    pub fn open(&self, raw: RawFrame) -> Result<Frame> {
        let header = raw.header;
        if header.security != self.mode() {
            return Err(RobovacError::Integrity(format!(
                "{:?} frame in {:?} mode rejected",
                header.security,
                self.mode()
            )));
        }
        self.check_kind(header.kind)?;

        let aad = header.aad();
        let body = match &self.protection {
            Protection::Handshake(auth) => auth
                .verify(&raw.body, &aad)
                .map_err(|e| RobovacError::Integrity(e.to_string()))?,
            Protection::Session(cipher) => cipher
                .decrypt(&raw.body, &aad)
                .map_err(|e| RobovacError::Integrity(e.to_string()))?,
        };

        let payload = if header.is_compressed() {
            gunzip(&body, self.options.max_payload)?
        } else {
            body
        };

        Ok(Frame {
            kind: header.kind,
            sequence: header.sequence,
            payload: Bytes::from(payload),
        })
    }

    fn check_kind(&self, kind: FrameKind) -> Result<()> {
        let allowed = match self.protection {
            Protection::Handshake(_) => kind.is_handshake() || kind == FrameKind::Close,
            Protection::Session(_) => !kind.is_handshake(),
        };
        if allowed {
            Ok(())
        } else {
            Err(RobovacError::Integrity(format!(
                "{kind:?} frame not allowed in {:?} mode",
                self.mode()
            )))
        }
    }
}

impl std::fmt::Debug for FrameSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSealer")
            .field("mode", &self.mode())
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}
