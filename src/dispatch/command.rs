//! Commands and their typed constructors.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::method::Method;
use crate::capability::{Capability, CapabilitySet};
use crate::error::{Result, RobovacError};
use crate::map::{Point, RoomId, RoomSelection};
use crate::model::ConsumableKind;

/// Most zones accepted in one zoned clean
pub const MAX_ZONES: usize = 5;
/// Passes per clean accepted by the device
pub const MAX_PASSES: u8 = 3;

/// Preset chosen by name, mapped to its code against the device's
/// capability set when the command is issued
#[derive(Debug, Clone, PartialEq, Eq)]
enum Preset {
    FanSpeed(String),
    WaterLevel(String),
    MopMode(String),
}

/// A rectangular area to clean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    /// First corner
    pub x0: i32,
    /// First corner
    pub y0: i32,
    /// Opposite corner
    pub x1: i32,
    /// Opposite corner
    pub y1: i32,
    /// Passes over the zone, 1 to 3
    pub repeats: u8,
}

impl Zone {
    /// Zone from two corners, cleaned once
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
            repeats: 1,
        }
    }

    /// Set the number of passes
    pub fn with_repeats(mut self, repeats: u8) -> Self {
        self.repeats = repeats;
        self
    }
}

/// Do-not-disturb window, local device time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DndWindow {
    /// Start hour
    pub start_hour: u8,
    /// Start minute
    pub start_minute: u8,
    /// End hour
    pub end_hour: u8,
    /// End minute
    pub end_minute: u8,
}

impl Default for DndWindow {
    /// 22:00 to 08:00
    fn default() -> Self {
        Self {
            start_hour: 22,
            start_minute: 0,
            end_hour: 8,
            end_minute: 0,
        }
    }
}

impl DndWindow {
    fn validate(&self) -> Result<()> {
        if self.start_hour > 23 || self.end_hour > 23 || self.start_minute > 59 || self.end_minute > 59 {
            return Err(RobovacError::InvalidCommand(format!(
                "Invalid DND window {:02}:{:02}-{:02}:{:02}",
                self.start_hour, self.start_minute, self.end_hour, self.end_minute
            )));
        }
        Ok(())
    }
}

/// A recurring clean
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Whether the schedule is active
    pub enabled: bool,
    /// Hour of day
    pub hour: u8,
    /// Minute
    pub minute: u8,
    /// Days of week, 0 = Sunday
    pub days: Vec<u8>,
}

impl Schedule {
    /// Parse `HH:MM`
    pub fn at(time: &str, days: Vec<u8>) -> Result<Self> {
        let invalid = || RobovacError::InvalidCommand(format!("Invalid schedule time: {time}"));
        let (hour, minute) = time.split_once(':').ok_or_else(invalid)?;
        let schedule = Self {
            enabled: true,
            hour: hour.trim().parse().map_err(|_| invalid())?,
            minute: minute.trim().parse().map_err(|_| invalid())?,
            days,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Cron expression understood by the device
    pub fn cron(&self) -> String {
        let days = if self.days.is_empty() {
            "*".to_string()
        } else {
            let mut days = self.days.clone();
            days.sort_unstable();
            days.dedup();
            days.iter().map(u8::to_string).collect::<Vec<_>>().join(",")
        };
        format!("{} {} * * {days}", self.minute, self.hour)
    }

    fn validate(&self) -> Result<()> {
        if self.hour > 23 || self.minute > 59 || self.days.iter().any(|day| *day > 6) {
            return Err(RobovacError::InvalidCommand(format!(
                "Invalid schedule {:02}:{:02} on {:?}",
                self.hour, self.minute, self.days
            )));
        }
        Ok(())
    }
}

/// A method with its parameters and per-command overrides.
///
/// Immutable once built; the dispatcher assigns the request id.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    method: Method,
    params: Value,
    preset: Option<Preset>,
    selection: Option<RoomSelection>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
}

impl Command {
    /// Command with no parameters
    pub fn new(method: Method) -> Self {
        Self {
            method,
            params: Value::Null,
            preset: None,
            selection: None,
            timeout: None,
            max_retries: None,
        }
    }

    /// Command by wire name
    pub fn named(name: &str, params: Value) -> Self {
        Self::new(Method::from_wire(name)).with_params(params)
    }

    /// Replace the parameters
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Override the response deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the retry count
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Parameters as built; presets are resolved at issue time
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Rooms this command targets
    pub fn selection(&self) -> Option<&RoomSelection> {
        self.selection.as_ref()
    }

    /// Segment ids in the parameters of an `app_segment_clean` built by
    /// wire name, without a selection. Accepts `[16, 17]` and
    /// `[{"segments": [16, 17], "repeat": 1}]`; `None` for other commands.
    pub fn raw_segments(&self) -> Result<Option<Vec<RoomId>>> {
        if self.method != Method::AppSegmentClean || self.selection.is_some() {
            return Ok(None);
        }
        let invalid = || {
            RobovacError::InvalidCommand(format!("Unrecognised segment parameters: {}", self.params))
        };
        let ids = match self.params.as_array().and_then(|entries| entries.first()) {
            Some(Value::Object(spec)) => spec
                .get("segments")
                .and_then(Value::as_array)
                .ok_or_else(invalid)?,
            Some(_) => self.params.as_array().ok_or_else(invalid)?,
            None => return Err(invalid()),
        };
        ids.iter()
            .map(|id| {
                id.as_u64()
                    .and_then(|id| u16::try_from(id).ok())
                    .map(RoomId)
                    .ok_or_else(invalid)
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    /// Deadline override
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Retry override
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Parameters to send, with named presets mapped to device codes
    pub fn resolve_params(&self, capabilities: &CapabilitySet) -> Result<Value> {
        let Some(preset) = &self.preset else {
            return Ok(self.params.clone());
        };
        let (kind, name, mode) = match preset {
            Preset::FanSpeed(name) => ("fan speed", name, capabilities.fan_speed(name)),
            Preset::WaterLevel(name) => ("water level", name, capabilities.water_level(name)),
            Preset::MopMode(name) => ("mop mode", name, capabilities.mop_mode(name)),
        };
        let mode = mode.ok_or_else(|| {
            RobovacError::InvalidCommand(format!(
                "Unknown {kind} '{name}' for {}",
                capabilities.model
            ))
        })?;
        Ok(json!([mode.code]))
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// `get_status`
    pub fn get_status() -> Self {
        Self::new(Method::GetStatus)
    }

    /// `get_consumable`
    pub fn get_consumables() -> Self {
        Self::new(Method::GetConsumable)
    }

    /// `get_map_v1`; the payload arrives as map chunks
    pub fn get_map() -> Self {
        Self::new(Method::GetMap)
    }

    /// `get_room_mapping`
    pub fn get_room_mapping() -> Self {
        Self::new(Method::GetRoomMapping)
    }

    // ── Cleaning ────────────────────────────────────────────────────

    /// Start a full clean
    pub fn start() -> Self {
        Self::new(Method::AppStart)
    }

    /// Stop cleaning
    pub fn stop() -> Self {
        Self::new(Method::AppStop)
    }

    /// Pause cleaning
    pub fn pause() -> Self {
        Self::new(Method::AppPause)
    }

    /// Return to the dock
    pub fn return_to_dock() -> Self {
        Self::new(Method::AppCharge)
    }

    /// Play the locator sound
    pub fn locate() -> Self {
        Self::new(Method::FindMe)
    }

    /// Spot clean around the current position
    pub fn spot() -> Self {
        Self::new(Method::AppSpot)
    }

    /// Clean the selected rooms, `repeat` passes each
    pub fn segment_clean(selection: RoomSelection, repeat: u8) -> Result<Self> {
        if selection.rooms.is_empty() {
            return Err(RobovacError::InvalidCommand("No rooms selected".to_string()));
        }
        check_passes(repeat)?;
        let params = json!([{ "segments": selection.segment_ids(), "repeat": repeat }]);
        let mut command = Self::new(Method::AppSegmentClean).with_params(params);
        command.selection = Some(selection);
        Ok(command)
    }

    /// Clean rectangular zones
    pub fn zoned_clean(zones: &[Zone]) -> Result<Self> {
        if zones.is_empty() || zones.len() > MAX_ZONES {
            return Err(RobovacError::InvalidCommand(format!(
                "Zoned clean takes 1 to {MAX_ZONES} zones, got {}",
                zones.len()
            )));
        }
        for zone in zones {
            check_passes(zone.repeats)?;
            if zone.x0 == zone.x1 || zone.y0 == zone.y1 {
                return Err(RobovacError::InvalidCommand(format!("Zone {zone:?} has no area")));
            }
        }
        let params: Vec<[i32; 5]> = zones
            .iter()
            .map(|z| [z.x0, z.y0, z.x1, z.y1, i32::from(z.repeats)])
            .collect();
        Ok(Self::new(Method::AppZonedClean).with_params(json!(params)))
    }

    /// Drive to a point
    pub fn goto_target(point: Point) -> Self {
        Self::new(Method::AppGotoTarget).with_params(json!([point.x, point.y]))
    }

    /// Empty the dustbin into the dock
    pub fn start_dust_collection() -> Self {
        Self::new(Method::AppStartCollectDust)
    }

    // ── Settings ────────────────────────────────────────────────────

    /// Fan preset by name, e.g. `"turbo"`
    pub fn set_fan_speed(name: impl Into<String>) -> Self {
        let mut command = Self::new(Method::SetCustomMode);
        command.preset = Some(Preset::FanSpeed(name.into()));
        command
    }

    /// Water level by name, e.g. `"moderate"`
    pub fn set_water_level(name: impl Into<String>) -> Self {
        let mut command = Self::new(Method::SetWaterBoxCustomMode);
        command.preset = Some(Preset::WaterLevel(name.into()));
        command
    }

    /// Mop route by name, e.g. `"deep"`
    pub fn set_clean_mode(name: impl Into<String>) -> Self {
        let mut command = Self::new(Method::SetMopMode);
        command.preset = Some(Preset::MopMode(name.into()));
        command
    }

    /// Reset a consumable counter
    pub fn reset_consumable(kind: ConsumableKind) -> Self {
        Self::new(Method::ResetConsumable).with_params(json!([kind.wire_name()]))
    }

    /// Enable do-not-disturb over `window`, or disable it with `None`
    pub fn set_dnd(window: Option<DndWindow>) -> Result<Self> {
        let params = match window {
            Some(w) => {
                w.validate()?;
                json!([w.start_hour, w.start_minute, w.end_hour, w.end_minute])
            }
            None => json!([0, 0, 0, 0]),
        };
        Ok(Self::new(Method::SetDndTimer).with_params(params))
    }

    /// Carpet boost on or off
    pub fn set_carpet_boost(enabled: bool) -> Self {
        Self::new(Method::SetCarpetMode).with_params(json!([u8::from(enabled)]))
    }

    /// Child lock on or off
    pub fn set_child_lock(enabled: bool) -> Self {
        Self::new(Method::SetChildLock).with_params(json!([u8::from(enabled)]))
    }

    /// Passes per clean, 1 to 3
    pub fn set_cleaning_passes(passes: u8) -> Result<Self> {
        check_passes(passes)?;
        Ok(Self::new(Method::SetCleanSequence).with_params(json!([passes])))
    }

    /// Speaker volume 0 to 100, rounded to steps of 10
    pub fn set_volume(volume: u8) -> Result<Self> {
        if volume > 100 {
            return Err(RobovacError::InvalidCommand(format!(
                "Volume {volume} out of range 0-100"
            )));
        }
        let stepped = (volume + 5) / 10 * 10;
        Ok(Self::new(Method::ChangeSoundVolume).with_params(json!([stepped.min(100)])))
    }

    /// Install a recurring clean
    pub fn set_schedule(schedule: &Schedule) -> Result<Self> {
        schedule.validate()?;
        let params = json!([{ "cron": schedule.cron(), "enabled": schedule.enabled }]);
        Ok(Self::new(Method::SetServerTimer).with_params(params))
    }

    // ── Map ─────────────────────────────────────────────────────────

    /// Rename a room
    pub fn name_segment(room: RoomId, name: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RobovacError::InvalidCommand("Room name is empty".to_string()));
        }
        Ok(Self::new(Method::NameSegment).with_params(json!([room.0, name])))
    }

    /// Discard the map and start remapping
    pub fn reset_map() -> Self {
        Self::new(Method::ResetMap)
    }

    /// Switch to another saved floor
    pub fn load_multi_map(map_id: u32) -> Self {
        Self::new(Method::LoadMultiMap).with_params(json!([map_id]))
    }

    /// Capability required to issue this command
    pub fn required_capability(&self) -> Option<Capability> {
        self.method.required_capability()
    }
}

fn check_passes(passes: u8) -> Result<()> {
    if passes == 0 || passes > MAX_PASSES {
        return Err(RobovacError::InvalidCommand(format!(
            "Passes must be 1 to {MAX_PASSES}, got {passes}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityTable;

    fn s7() -> CapabilitySet {
        CapabilityTable::builtin()
            .unwrap()
            .lookup("roborock.vacuum.a15", "02.15.00")
    }

    #[test]
    fn test_segment_clean_params() {
        let selection = RoomSelection {
            map_id: 1,
            generation: 3,
            rooms: vec![RoomId(16), RoomId(18)],
        };
        let command = Command::segment_clean(selection.clone(), 2).unwrap();
        assert_eq!(command.method(), &Method::AppSegmentClean);
        assert_eq!(command.params(), &json!([{ "segments": [16, 18], "repeat": 2 }]));
        assert_eq!(command.selection(), Some(&selection));
        assert!(Command::segment_clean(selection, 4).is_err());
    }

    #[test]
    fn test_raw_segments_from_wire_params() {
        let plain = Command::named("app_segment_clean", json!([16, 17]));
        assert_eq!(plain.raw_segments().unwrap(), Some(vec![RoomId(16), RoomId(17)]));

        let wrapped = Command::named("app_segment_clean", json!([{ "segments": [18], "repeat": 1 }]));
        assert_eq!(wrapped.raw_segments().unwrap(), Some(vec![RoomId(18)]));

        assert!(Command::named("app_segment_clean", json!([-1])).raw_segments().is_err());
        assert!(Command::named("app_segment_clean", Value::Null).raw_segments().is_err());
        assert_eq!(Command::named("app_start", json!([16])).raw_segments().unwrap(), None);

        let selection = RoomSelection {
            map_id: 1,
            generation: 1,
            rooms: vec![RoomId(16)],
        };
        let typed = Command::segment_clean(selection, 1).unwrap();
        assert_eq!(typed.raw_segments().unwrap(), None);
    }

    #[test]
    fn test_zoned_clean_validation() {
        let zone = Zone::new(2000, 2000, 1000, 1000).with_repeats(2);
        let command = Command::zoned_clean(&[zone]).unwrap();
        assert_eq!(command.params(), &json!([[1000, 1000, 2000, 2000, 2]]));

        assert!(Command::zoned_clean(&[]).is_err());
        assert!(Command::zoned_clean(&[Zone::new(0, 0, 0, 10)]).is_err());
        assert!(Command::zoned_clean(&[Zone::new(0, 0, 10, 10); 6]).is_err());
    }

    #[test]
    fn test_fan_speed_resolved_against_capabilities() {
        let caps = s7();
        let command = Command::set_fan_speed("turbo");
        assert_eq!(command.resolve_params(&caps).unwrap(), json!([103]));
        assert!(matches!(
            Command::set_fan_speed("ludicrous").resolve_params(&caps),
            Err(RobovacError::InvalidCommand(_))
        ));
        assert_eq!(
            Command::set_clean_mode("deep").resolve_params(&caps).unwrap(),
            json!([301])
        );
    }

    #[test]
    fn test_dnd_window() {
        let on = Command::set_dnd(Some(DndWindow::default())).unwrap();
        assert_eq!(on.params(), &json!([22, 0, 8, 0]));
        let off = Command::set_dnd(None).unwrap();
        assert_eq!(off.params(), &json!([0, 0, 0, 0]));
        let bad = DndWindow {
            start_hour: 24,
            ..DndWindow::default()
        };
        assert!(Command::set_dnd(Some(bad)).is_err());
    }

    #[test]
    fn test_numbers_and_switches() {
        assert_eq!(Command::set_volume(47).unwrap().params(), &json!([50]));
        assert_eq!(Command::set_volume(100).unwrap().params(), &json!([100]));
        assert!(Command::set_volume(101).is_err());
        assert!(Command::set_cleaning_passes(0).is_err());
        assert_eq!(Command::set_carpet_boost(true).params(), &json!([1]));
        assert_eq!(Command::set_child_lock(false).params(), &json!([0]));
    }

    #[test]
    fn test_schedule_cron() {
        let schedule = Schedule::at("09:30", vec![5, 1, 3, 1]).unwrap();
        assert_eq!(schedule.cron(), "30 9 * * 1,3,5");
        assert!(Schedule::at("25:00", vec![]).is_err());
        assert!(Schedule::at("nine", vec![]).is_err());
        let command = Command::set_schedule(&schedule).unwrap();
        assert_eq!(command.params()[0]["enabled"], true);
    }

    #[test]
    fn test_name_segment() {
        let command = Command::name_segment(RoomId(16), " Kitchen ").unwrap();
        assert_eq!(command.params(), &json!([16, "Kitchen"]));
        assert!(Command::name_segment(RoomId(16), "  ").is_err());
    }

    #[test]
    fn test_overrides() {
        let command = Command::named("get_dock_info", Value::Null)
            .with_timeout(Duration::from_secs(2))
            .with_retries(0);
        assert_eq!(command.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(command.max_retries(), Some(0));
        assert_eq!(command.required_capability(), None);
    }
}
