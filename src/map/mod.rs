//! Map and room model.
//!
//! Map payloads are parsed into a [`RoomGraph`]: rooms keyed by the
//! device's segment ids, with names, bounds and adjacency. The current
//! graph lives in an [`ArcSwap`] cell so readers always see a complete
//! graph while a new one is being installed.
//!
//! A payload that fails to parse never replaces a good graph. Room names
//! learned separately (room mapping, renames) survive new payloads until the
//! layout generation changes.

mod graph;
mod parser;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use crate::error::Result;

pub use graph::{
    default_room_name, BoundingBox, Point, RobotPose, Room, RoomGraph, RoomId, RoomSelection,
    RoomSummary, ADJACENCY_TOLERANCE,
};
pub use parser::{parse, parse_uncompressed, MapBuilder, MAP_MAGIC, MAP_VERSION};

/// Outcome of applying a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapChange {
    /// Same rooms and generation as before
    Unchanged,
    /// Rooms changed within the same generation
    Updated,
    /// Generation or floor changed; earlier selections are stale
    Regenerated,
}

#[derive(Debug, Default)]
struct Layout {
    /// Graph as parsed, before name overrides
    parsed: RoomGraph,
    /// Names learned outside the map payload
    names: BTreeMap<RoomId, String>,
}

/// Holds the last good room graph of one device
#[derive(Debug)]
pub struct RoomModel {
    layout: Mutex<Layout>,
    current: ArcSwap<RoomGraph>,
    max_size: usize,
}

impl RoomModel {
    /// Empty model accepting payloads up to `max_size` decompressed bytes
    pub fn new(max_size: usize) -> Self {
        Self {
            layout: Mutex::new(Layout::default()),
            current: ArcSwap::from_pointee(RoomGraph::empty()),
            max_size,
        }
    }

    /// Current graph
    pub fn graph(&self) -> Arc<RoomGraph> {
        self.current.load_full()
    }

    /// Parse a payload and install it.
    ///
    /// On error the previous graph stays current and `MapParse` is returned.
    pub fn apply(&self, payload: &[u8]) -> Result<(Arc<RoomGraph>, MapChange)> {
        let graph = parse(payload, self.max_size)?;
        Ok(self.install(graph))
    }

    /// Install an already parsed graph
    pub fn install(&self, graph: RoomGraph) -> (Arc<RoomGraph>, MapChange) {
        let mut layout = self.layout.lock().unwrap_or_else(PoisonError::into_inner);

        let change = if graph.generation() != layout.parsed.generation()
            || graph.map_id() != layout.parsed.map_id()
        {
            layout.names.clear();
            MapChange::Regenerated
        } else if graph == layout.parsed {
            MapChange::Unchanged
        } else {
            MapChange::Updated
        };

        layout.parsed = graph;
        let merged = Arc::new(layout.parsed.with_names(&layout.names));
        self.current.store(Arc::clone(&merged));
        (merged, change)
    }

    /// Merge room names and republish the graph. Ids not in the current
    /// graph are remembered for later payloads of the same generation.
    pub fn set_names(&self, update: impl IntoIterator<Item = (RoomId, String)>) -> Arc<RoomGraph> {
        let mut layout = self.layout.lock().unwrap_or_else(PoisonError::into_inner);
        layout.names.extend(update);
        let merged = Arc::new(layout.parsed.with_names(&layout.names));
        self.current.store(Arc::clone(&merged));
        merged
    }
}

/// Parse a `get_room_mapping` result: `[[segment_id, name], ...]`.
/// Entries that are not `[number, string]` pairs are skipped.
pub fn room_names_from_mapping(value: &serde_json::Value) -> Vec<(RoomId, String)> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let pair = entry.as_array()?;
            let id = u16::try_from(pair.first()?.as_u64()?).ok()?;
            let name = pair.get(1)?.as_str()?;
            Some((RoomId(id), name.to_string()))
        })
        .collect()
}

/// Parse a `room_names` event: `{"16": "Kitchen", ...}`
pub fn room_names_from_object(value: &serde_json::Value) -> Vec<(RoomId, String)> {
    let Some(object) = value.as_object() else {
        return Vec::new();
    };
    object
        .iter()
        .filter_map(|(key, name)| {
            let id = key.parse::<u16>().ok()?;
            Some((RoomId(id), name.as_str()?.to_string()))
        })
        .collect()
}
