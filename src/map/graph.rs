//! Room graph built from a parsed map.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RobovacError};

/// Rooms whose bounding boxes come within this distance are neighbours
pub const ADJACENCY_TOLERANCE: i32 = 100;

/// Stable room identifier: the device's segment id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u16);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point in map coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: i32,
    /// Y coordinate
    pub y: i32,
}

impl Point {
    /// Create a point
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Robot position and heading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotPose {
    /// Position
    pub position: Point,
    /// Heading in degrees
    pub angle: i16,
}

/// Axis-aligned rectangle, normalised so that `x0 <= x1` and `y0 <= y1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left
    pub x0: i32,
    /// Bottom
    pub y0: i32,
    /// Right
    pub x1: i32,
    /// Top
    pub y1: i32,
}

impl BoundingBox {
    /// Box from two opposite corners in any order
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    /// Width
    pub fn width(&self) -> i64 {
        i64::from(self.x1) - i64::from(self.x0)
    }

    /// Height
    pub fn height(&self) -> i64 {
        i64::from(self.y1) - i64::from(self.y0)
    }

    /// Area
    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    /// Centre point
    pub fn center(&self) -> Point {
        let mid = |a: i32, b: i32| ((i64::from(a) + i64::from(b)) / 2) as i32;
        Point::new(mid(self.x0, self.x1), mid(self.y0, self.y1))
    }

    /// Whether the point lies inside (edges included)
    pub fn contains(&self, point: Point) -> bool {
        (self.x0..=self.x1).contains(&point.x) && (self.y0..=self.y1).contains(&point.y)
    }

    /// Whether the boxes overlap or lie within `tolerance` of each other
    pub fn touches(&self, other: &BoundingBox, tolerance: i32) -> bool {
        let t = i64::from(tolerance);
        i64::from(self.x0) - t <= i64::from(other.x1)
            && i64::from(other.x0) - t <= i64::from(self.x1)
            && i64::from(self.y0) - t <= i64::from(other.y1)
            && i64::from(other.y0) - t <= i64::from(self.y1)
    }
}

/// A named cleaning segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Segment id
    pub id: RoomId,
    /// Display name; `Room {id}` when the device did not name it
    pub name: String,
    /// Map (floor) this room belongs to
    pub map_id: u32,
    /// Extent
    pub bounds: BoundingBox,
    /// Adjacent rooms, sorted by id
    pub neighbors: Vec<RoomId>,
}

impl Room {
    /// Room without neighbours; the graph computes those
    pub fn new(id: RoomId, name: impl Into<String>, map_id: u32, bounds: BoundingBox) -> Self {
        let name = name.into();
        let name = if name.trim().is_empty() {
            default_room_name(id)
        } else {
            name
        };
        Self {
            id,
            name,
            map_id,
            bounds,
            neighbors: Vec::new(),
        }
    }
}

/// Name used for rooms the device has not named
pub fn default_room_name(id: RoomId) -> String {
    format!("Room {id}")
}

/// Rooms chosen against a specific map and generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSelection {
    /// Map (floor) the rooms were chosen from
    #[serde(default)]
    pub map_id: u32,
    /// Generation the rooms were chosen from
    pub generation: u32,
    /// Chosen rooms, in cleaning order
    pub rooms: Vec<RoomId>,
}

impl RoomSelection {
    /// Segment ids as sent to the device
    pub fn segment_ids(&self) -> Vec<u16> {
        self.rooms.iter().map(|room| room.0).collect()
    }
}

/// Overview of a room graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSummary {
    /// Number of rooms
    pub total_rooms: usize,
    /// Room names in default cleaning order
    pub cleaning_order: Vec<String>,
    /// Map generation
    pub generation: u32,
}

/// Parsed room layout of one map generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomGraph {
    map_id: u32,
    generation: u32,
    rooms: Vec<Room>,
    charger: Option<Point>,
    robot: Option<RobotPose>,
}

impl Default for RoomGraph {
    fn default() -> Self {
        Self::empty()
    }
}

impl RoomGraph {
    /// Graph with no rooms, before any map arrived
    pub fn empty() -> Self {
        Self {
            map_id: 0,
            generation: 0,
            rooms: Vec::new(),
            charger: None,
            robot: None,
        }
    }

    /// Build a graph. Rooms are sorted by id and neighbours computed.
    pub fn new(
        map_id: u32,
        generation: u32,
        mut rooms: Vec<Room>,
        charger: Option<Point>,
        robot: Option<RobotPose>,
    ) -> Self {
        rooms.sort_by_key(|room| room.id);
        let bounds: Vec<(RoomId, u32, BoundingBox)> =
            rooms.iter().map(|r| (r.id, r.map_id, r.bounds)).collect();
        for room in &mut rooms {
            room.neighbors = bounds
                .iter()
                .filter(|(id, map_id, other)| {
                    *id != room.id
                        && *map_id == room.map_id
                        && room.bounds.touches(other, ADJACENCY_TOLERANCE)
                })
                .map(|(id, _, _)| *id)
                .collect();
        }
        Self {
            map_id,
            generation,
            rooms,
            charger,
            robot,
        }
    }

    /// Map id
    pub fn map_id(&self) -> u32 {
        self.map_id
    }

    /// Layout generation; changes when the map is reset
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Rooms sorted by id
    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    /// Number of rooms
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether there are no rooms
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Dock position
    pub fn charger(&self) -> Option<Point> {
        self.charger
    }

    /// Robot pose when the map was taken
    pub fn robot(&self) -> Option<RobotPose> {
        self.robot
    }

    /// Room by id
    pub fn room(&self, id: RoomId) -> Option<&Room> {
        self.rooms
            .binary_search_by_key(&id, |room| room.id)
            .ok()
            .map(|idx| &self.rooms[idx])
    }

    /// Room by name (case-insensitive, surrounding whitespace ignored)
    pub fn room_by_name(&self, name: &str) -> Option<&Room> {
        let wanted = name.trim();
        self.rooms
            .iter()
            .find(|room| room.name.eq_ignore_ascii_case(wanted))
    }

    /// Room containing a point
    pub fn room_at(&self, point: Point) -> Option<&Room> {
        self.rooms.iter().find(|room| room.bounds.contains(point))
    }

    /// Select rooms by id. Duplicates are dropped, order is kept.
    pub fn select(&self, ids: &[RoomId]) -> Result<RoomSelection> {
        if ids.is_empty() {
            return Err(RobovacError::InvalidCommand("No rooms selected".to_string()));
        }
        let mut rooms = Vec::with_capacity(ids.len());
        for id in ids {
            if self.room(*id).is_none() {
                return Err(RobovacError::UnknownRoom(id.to_string()));
            }
            if !rooms.contains(id) {
                rooms.push(*id);
            }
        }
        Ok(RoomSelection {
            map_id: self.map_id,
            generation: self.generation,
            rooms,
        })
    }

    /// Select rooms by name
    pub fn select_by_names<S: AsRef<str>>(&self, names: &[S]) -> Result<RoomSelection> {
        let ids = names
            .iter()
            .map(|name| {
                self.room_by_name(name.as_ref())
                    .map(|room| room.id)
                    .ok_or_else(|| RobovacError::UnknownRoom(name.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        self.select(&ids)
    }

    /// Select every room in id order
    pub fn select_all(&self) -> Result<RoomSelection> {
        let ids: Vec<RoomId> = self.rooms.iter().map(|room| room.id).collect();
        self.select(&ids)
    }

    /// Check that a selection still refers to this layout
    pub fn validate(&self, selection: &RoomSelection) -> Result<()> {
        if selection.generation != self.generation || selection.map_id != self.map_id {
            return Err(RobovacError::StaleRoomReference {
                selected: selection.generation,
                current: self.generation,
                selected_map: selection.map_id,
                current_map: self.map_id,
            });
        }
        if let Some(missing) = selection.rooms.iter().find(|id| self.room(**id).is_none()) {
            return Err(RobovacError::UnknownRoom(missing.to_string()));
        }
        Ok(())
    }

    /// Copy with names replaced for the given ids
    pub fn with_names(&self, names: &BTreeMap<RoomId, String>) -> Self {
        let mut graph = self.clone();
        for room in &mut graph.rooms {
            if let Some(name) = names.get(&room.id) {
                if !name.trim().is_empty() {
                    room.name = name.trim().to_string();
                }
            }
        }
        graph
    }

    /// Room count and default cleaning order
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            total_rooms: self.rooms.len(),
            cleaning_order: self.rooms.iter().map(|room| room.name.clone()).collect(),
            generation: self.generation,
        }
    }
}
