//! Binary map payload parser and builder.
//!
//! Payloads are gzip-compressed. Decompressed layout (little-endian):
//!
//! ```text
//! magic b"rm" | version u8 | flags u8 | map_id u32 | generation u32 | block_count u16
//! block: kind u8 | len u32 | data[len]
//!   0x01 ROOM     segment_id u16 | name_len u8 | name | x0 y0 x1 y1 (i32)
//!   0x02 CHARGER  x i32 | y i32
//!   0x03 ROBOT    x i32 | y i32 | angle i16
//! trailer: crc32 u32 over everything before it
//! ```
//!
//! Unknown block kinds are skipped. Anything truncated, inconsistent or
//! failing the checksum is rejected as a whole.

use std::collections::BTreeSet;

use bytes::{Buf, BufMut, BytesMut};

use super::graph::{BoundingBox, Point, RobotPose, Room, RoomGraph, RoomId};
use crate::codec::compress::{gunzip, gzip};
use crate::error::{Result, RobovacError};

/// Payload magic
pub const MAP_MAGIC: [u8; 2] = *b"rm";
/// Payload format version
pub const MAP_VERSION: u8 = 1;

const HEADER_LEN: usize = 2 + 1 + 1 + 4 + 4 + 2;
const TRAILER_LEN: usize = 4;
const BLOCK_HEADER_LEN: usize = 1 + 4;

/// Block kinds
mod block {
    pub const ROOM: u8 = 0x01;
    pub const CHARGER: u8 = 0x02;
    pub const ROBOT: u8 = 0x03;
}

fn parse_error(msg: impl Into<String>) -> RobovacError {
    RobovacError::MapParse(msg.into())
}

/// Parse a compressed map payload
pub fn parse(payload: &[u8], max_size: usize) -> Result<RoomGraph> {
    let raw = gunzip(payload, max_size).map_err(|e| parse_error(e.to_string()))?;
    parse_uncompressed(&raw)
}

/// Parse an already decompressed map payload
pub fn parse_uncompressed(raw: &[u8]) -> Result<RoomGraph> {
    if raw.len() < HEADER_LEN + TRAILER_LEN {
        return Err(parse_error(format!("Map payload too short: {} bytes", raw.len())));
    }

    let (body, trailer) = raw.split_at(raw.len() - TRAILER_LEN);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(parse_error(format!(
            "Map checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
        )));
    }

    let mut buf = body;
    if buf[..2] != MAP_MAGIC {
        return Err(parse_error("Bad map magic"));
    }
    buf.advance(2);
    let version = buf.get_u8();
    if version != MAP_VERSION {
        return Err(parse_error(format!("Unsupported map version {version}")));
    }
    let _flags = buf.get_u8();
    let map_id = buf.get_u32_le();
    let generation = buf.get_u32_le();
    let block_count = buf.get_u16_le();

    let mut rooms = Vec::new();
    let mut seen = BTreeSet::new();
    let mut charger = None;
    let mut robot = None;

    for index in 0..block_count {
        if buf.remaining() < BLOCK_HEADER_LEN {
            return Err(parse_error(format!("Block {index} header truncated")));
        }
        let kind = buf.get_u8();
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            return Err(parse_error(format!(
                "Block {index} declares {len} bytes, {} left",
                buf.remaining()
            )));
        }
        let (data, rest) = buf.split_at(len);
        buf = rest;

        match kind {
            block::ROOM => {
                let room = parse_room(data, map_id)?;
                if !seen.insert(room.id) {
                    return Err(parse_error(format!("Duplicate segment id {}", room.id)));
                }
                rooms.push(room);
            }
            block::CHARGER => charger = Some(parse_point(data, "charger")?),
            block::ROBOT => robot = Some(parse_robot(data)?),
            other => {
                tracing::trace!(kind = other, len, "Skipping unknown map block");
            }
        }
    }

    if buf.has_remaining() {
        return Err(parse_error(format!(
            "{} trailing bytes after {block_count} blocks",
            buf.remaining()
        )));
    }

    Ok(RoomGraph::new(map_id, generation, rooms, charger, robot))
}

fn parse_room(mut data: &[u8], map_id: u32) -> Result<Room> {
    if data.len() < 3 {
        return Err(parse_error("Room block truncated"));
    }
    let id = RoomId(data.get_u16_le());
    let name_len = usize::from(data.get_u8());
    if data.len() != name_len + 16 {
        return Err(parse_error(format!(
            "Room {id} block has {} bytes after header, expected {}",
            data.len(),
            name_len + 16
        )));
    }
    let name = std::str::from_utf8(&data[..name_len])
        .map_err(|_| parse_error(format!("Room {id} name is not UTF-8")))?
        .to_string();
    data.advance(name_len);
    let bounds = BoundingBox::new(
        data.get_i32_le(),
        data.get_i32_le(),
        data.get_i32_le(),
        data.get_i32_le(),
    );
    Ok(Room::new(id, name, map_id, bounds))
}

fn parse_point(mut data: &[u8], what: &str) -> Result<Point> {
    if data.len() < 8 {
        return Err(parse_error(format!("{what} block truncated")));
    }
    Ok(Point::new(data.get_i32_le(), data.get_i32_le()))
}

fn parse_robot(data: &[u8]) -> Result<RobotPose> {
    if data.len() < 10 {
        return Err(parse_error("robot block truncated"));
    }
    let position = parse_point(&data[..8], "robot")?;
    let angle = i16::from_le_bytes([data[8], data[9]]);
    Ok(RobotPose { position, angle })
}

/// Builds map payloads; used by device simulators and tests
#[derive(Debug, Clone)]
pub struct MapBuilder {
    map_id: u32,
    generation: u32,
    blocks: Vec<(u8, Vec<u8>)>,
}

impl MapBuilder {
    /// Empty map
    pub fn new(map_id: u32, generation: u32) -> Self {
        Self {
            map_id,
            generation,
            blocks: Vec::new(),
        }
    }

    /// Add a room. Names longer than 255 bytes are cut at a character
    /// boundary.
    pub fn room(mut self, id: u16, name: &str, bounds: BoundingBox) -> Self {
        let mut end = name.len().min(usize::from(u8::MAX));
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let name = &name.as_bytes()[..end];
        let mut data = Vec::with_capacity(3 + name.len() + 16);
        data.put_u16_le(id);
        data.put_u8(name.len() as u8);
        data.put_slice(name);
        for v in [bounds.x0, bounds.y0, bounds.x1, bounds.y1] {
            data.put_i32_le(v);
        }
        self.blocks.push((block::ROOM, data));
        self
    }

    /// Set the dock position
    pub fn charger(mut self, x: i32, y: i32) -> Self {
        let mut data = Vec::with_capacity(8);
        data.put_i32_le(x);
        data.put_i32_le(y);
        self.blocks.push((block::CHARGER, data));
        self
    }

    /// Set the robot pose
    pub fn robot(mut self, x: i32, y: i32, angle: i16) -> Self {
        let mut data = Vec::with_capacity(10);
        data.put_i32_le(x);
        data.put_i32_le(y);
        data.put_i16_le(angle);
        self.blocks.push((block::ROBOT, data));
        self
    }

    /// Add an arbitrary block
    pub fn raw_block(mut self, kind: u8, data: Vec<u8>) -> Self {
        self.blocks.push((kind, data));
        self
    }

    /// Uncompressed payload including the checksum trailer
    pub fn build_uncompressed(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAP_MAGIC);
        buf.put_u8(MAP_VERSION);
        buf.put_u8(0);
        buf.put_u32_le(self.map_id);
        buf.put_u32_le(self.generation);
        buf.put_u16_le(self.blocks.len() as u16);
        for (kind, data) in &self.blocks {
            buf.put_u8(*kind);
            buf.put_u32_le(data.len() as u32);
            buf.put_slice(data);
        }
        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);
        buf.to_vec()
    }

    /// Compressed payload as sent by a device
    pub fn build(&self) -> Result<Vec<u8>> {
        gzip(&self.build_uncompressed())
    }
}
