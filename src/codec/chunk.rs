//! Chunked map transfers.
//!
//! Map payloads are larger than a single frame, so devices split them into
//! `MapChunk` frames:
//!
//! ```text
//! transfer_id u32 LE | index u16 LE | total u16 LE | data
//! ```
//!
//! [`MapAssembler`] collects chunks per transfer and yields the payload once
//! every index has arrived. Transfers that exceed the size cap, disagree on
//! `total`, or stall past the timeout are discarded.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, RobovacError};

/// Chunk header size
pub const CHUNK_HEADER_SIZE: usize = 8;

/// One part of a map transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapChunk {
    /// Transfer this chunk belongs to
    pub transfer_id: u32,
    /// Zero-based chunk index
    pub index: u16,
    /// Number of chunks in the transfer
    pub total: u16,
    /// Chunk data
    pub data: Bytes,
}

impl MapChunk {
    /// Encode to the chunk wire format
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CHUNK_HEADER_SIZE + self.data.len());
        buf.put_u32_le(self.transfer_id);
        buf.put_u16_le(self.index);
        buf.put_u16_le(self.total);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Decode from the chunk wire format
    pub fn decode(payload: &Bytes) -> Result<Self> {
        if payload.len() < CHUNK_HEADER_SIZE {
            return Err(RobovacError::Decode(format!(
                "Map chunk too short: {} bytes",
                payload.len()
            )));
        }
        let transfer_id = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let index = u16::from_le_bytes([payload[4], payload[5]]);
        let total = u16::from_le_bytes([payload[6], payload[7]]);

        if total == 0 || index >= total {
            return Err(RobovacError::Decode(format!(
                "Map chunk index {index} out of range for total {total}"
            )));
        }

        Ok(Self {
            transfer_id,
            index,
            total,
            data: payload.slice(CHUNK_HEADER_SIZE..),
        })
    }

    /// Split a payload into chunks of at most `chunk_size` data bytes
    pub fn split(transfer_id: u32, payload: &[u8], chunk_size: usize) -> Result<Vec<MapChunk>> {
        let chunk_size = chunk_size.max(1);
        let count = payload.len().div_ceil(chunk_size).max(1);
        let total = u16::try_from(count).map_err(|_| {
            RobovacError::InvalidCommand(format!("Map payload needs {count} chunks (max 65535)"))
        })?;

        if payload.is_empty() {
            return Ok(vec![MapChunk {
                transfer_id,
                index: 0,
                total,
                data: Bytes::new(),
            }]);
        }

        Ok(payload
            .chunks(chunk_size)
            .enumerate()
            .map(|(index, data)| MapChunk {
                transfer_id,
                index: index as u16,
                total,
                data: Bytes::copy_from_slice(data),
            })
            .collect())
    }
}

#[derive(Debug)]
struct PartialTransfer {
    total: u16,
    parts: Vec<Option<Bytes>>,
    received: usize,
    bytes: usize,
    started: Instant,
}

/// Reassembles chunked map transfers
#[derive(Debug)]
pub struct MapAssembler {
    transfers: HashMap<u32, PartialTransfer>,
    max_size: usize,
    timeout: Duration,
}

impl MapAssembler {
    /// Create an assembler with a payload size cap and stall timeout
    pub fn new(max_size: usize, timeout: Duration) -> Self {
        Self {
            transfers: HashMap::new(),
            max_size,
            timeout,
        }
    }

    /// Number of incomplete transfers
    pub fn pending(&self) -> usize {
        self.transfers.len()
    }

    /// Add a chunk. Returns the full payload when the transfer completes.
    pub fn push(&mut self, chunk: MapChunk) -> Result<Option<Bytes>> {
        self.push_at(chunk, Instant::now())
    }

    fn push_at(&mut self, chunk: MapChunk, now: Instant) -> Result<Option<Bytes>> {
        self.expire(now);

        if chunk.total == 1 {
            self.transfers.remove(&chunk.transfer_id);
            return self.check_size(chunk.data.len()).map(|()| Some(chunk.data));
        }

        let transfer = self
            .transfers
            .entry(chunk.transfer_id)
            .or_insert_with(|| PartialTransfer {
                total: chunk.total,
                parts: vec![None; usize::from(chunk.total)],
                received: 0,
                bytes: 0,
                started: now,
            });

        if transfer.total != chunk.total {
            self.transfers.remove(&chunk.transfer_id);
            return Err(RobovacError::Decode(format!(
                "Map transfer {} changed chunk count",
                chunk.transfer_id
            )));
        }

        let slot = &mut transfer.parts[usize::from(chunk.index)];
        if let Some(previous) = slot.replace(chunk.data.clone()) {
            transfer.bytes -= previous.len();
        } else {
            transfer.received += 1;
        }
        transfer.bytes += chunk.data.len();

        if transfer.bytes > self.max_size {
            let bytes = transfer.bytes;
            self.transfers.remove(&chunk.transfer_id);
            return Err(RobovacError::Decode(format!(
                "Map transfer {} exceeds {} bytes ({bytes} received)",
                chunk.transfer_id, self.max_size
            )));
        }

        if transfer.received < usize::from(transfer.total) {
            return Ok(None);
        }

        let Some(done) = self.transfers.remove(&chunk.transfer_id) else {
            return Ok(None);
        };
        let mut payload = BytesMut::with_capacity(done.bytes);
        for part in done.parts.into_iter().flatten() {
            payload.put_slice(&part);
        }
        Ok(Some(payload.freeze()))
    }

    /// Drop transfers that have not completed within the timeout
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.transfers.len();
        let timeout = self.timeout;
        self.transfers.retain(|id, transfer| {
            let alive = now.saturating_duration_since(transfer.started) <= timeout;
            if !alive {
                tracing::debug!(transfer_id = id, "discarding stalled map transfer");
            }
            alive
        });
        before - self.transfers.len()
    }

    fn check_size(&self, len: usize) -> Result<()> {
        if len > self.max_size {
            return Err(RobovacError::Decode(format!(
                "Map payload of {len} bytes exceeds {} bytes",
                self.max_size
            )));
        }
        Ok(())
    }
}
