//! Per-model capability detection.
//!
//! Which commands a device accepts depends on its model and firmware. The
//! [`CapabilityRegistry`] answers that from a versioned table:
//!
//! 1. base entry by model designator or alias
//! 2. firmware gates that switch individual capabilities on within a range
//! 3. flags the device reported about itself, which always win
//!
//! Unknown models get a conservative baseline. Nothing else is assumed.

mod firmware;
mod registry;
mod table;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RobovacError};

pub use firmware::FirmwareVersion;
pub use registry::CapabilityRegistry;
pub use table::{CapabilityTable, FirmwareGate, ModelEntry, TABLE_VERSION};

/// Everything a command may require of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Status polling
    Status,
    /// Start a full clean
    Start,
    /// Stop the current task
    Stop,
    /// Pause the current task
    Pause,
    /// Return to dock
    ReturnToDock,
    /// Play the locate sound
    Locate,
    /// Consumable counters
    Consumables,
    /// Reset a consumable counter
    ConsumableReset,
    /// Fan power presets
    FanSpeed,
    /// Spot clean around the robot
    SpotCleaning,
    /// Rectangular zone cleaning
    ZoneCleaning,
    /// Room (segment) cleaning
    SegmentCleaning,
    /// Drive to a map point
    GotoTarget,
    /// Map download
    MapRetrieval,
    /// Several stored floors
    MultiFloor,
    /// Room renaming
    RoomNaming,
    /// Map reset
    MapReset,
    /// Mop attachment
    Mopping,
    /// Water flow levels
    WaterLevel,
    /// Mop route modes
    MopMode,
    /// Auto-empty dock
    DustCollection,
    /// Carpet suction boost
    CarpetBoost,
    /// Child lock
    ChildLock,
    /// Do-not-disturb window
    DoNotDisturb,
    /// Speaker volume
    SoundVolume,
    /// Passes per clean
    CleaningPasses,
    /// Stored cleaning schedules
    Schedules,
}

impl Capability {
    /// All capabilities
    pub const ALL: [Self; 27] = [
        Self::Status,
        Self::Start,
        Self::Stop,
        Self::Pause,
        Self::ReturnToDock,
        Self::Locate,
        Self::Consumables,
        Self::ConsumableReset,
        Self::FanSpeed,
        Self::SpotCleaning,
        Self::ZoneCleaning,
        Self::SegmentCleaning,
        Self::GotoTarget,
        Self::MapRetrieval,
        Self::MultiFloor,
        Self::RoomNaming,
        Self::MapReset,
        Self::Mopping,
        Self::WaterLevel,
        Self::MopMode,
        Self::DustCollection,
        Self::CarpetBoost,
        Self::ChildLock,
        Self::DoNotDisturb,
        Self::SoundVolume,
        Self::CleaningPasses,
        Self::Schedules,
    ];

    /// Baseline granted to models missing from the table
    pub const BASELINE: [Self; 7] = [
        Self::Status,
        Self::Start,
        Self::Stop,
        Self::Pause,
        Self::ReturnToDock,
        Self::Locate,
        Self::Consumables,
    ];

    /// Table and wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::ReturnToDock => "return_to_dock",
            Self::Locate => "locate",
            Self::Consumables => "consumables",
            Self::ConsumableReset => "consumable_reset",
            Self::FanSpeed => "fan_speed",
            Self::SpotCleaning => "spot_cleaning",
            Self::ZoneCleaning => "zone_cleaning",
            Self::SegmentCleaning => "segment_cleaning",
            Self::GotoTarget => "goto_target",
            Self::MapRetrieval => "map_retrieval",
            Self::MultiFloor => "multi_floor",
            Self::RoomNaming => "room_naming",
            Self::MapReset => "map_reset",
            Self::Mopping => "mopping",
            Self::WaterLevel => "water_level",
            Self::MopMode => "mop_mode",
            Self::DustCollection => "dust_collection",
            Self::CarpetBoost => "carpet_boost",
            Self::ChildLock => "child_lock",
            Self::DoNotDisturb => "do_not_disturb",
            Self::SoundVolume => "sound_volume",
            Self::CleaningPasses => "cleaning_passes",
            Self::Schedules => "schedules",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|cap| cap.as_str() == wanted)
            .ok_or_else(|| format!("Unknown capability: {s}"))
    }
}

/// A named device preset and its wire code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedMode {
    /// Preset name, e.g. `balanced`
    pub name: String,
    /// Value sent to the device
    pub code: u32,
}

impl NamedMode {
    /// Create a preset
    pub fn new(name: impl Into<String>, code: u32) -> Self {
        Self {
            name: name.into(),
            code,
        }
    }
}

/// Find a preset by name (case-insensitive)
pub fn find_mode<'a>(modes: &'a [NamedMode], name: &str) -> Option<&'a NamedMode> {
    modes.iter().find(|mode| mode.name.eq_ignore_ascii_case(name))
}

/// Effective capabilities of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    /// Model designator this set was resolved for
    pub model: String,
    /// Firmware version this set was resolved for
    pub firmware: String,
    /// Supported capabilities
    pub supported: BTreeSet<Capability>,
    /// Fan power presets, in device order
    #[serde(default)]
    pub fan_speeds: Vec<NamedMode>,
    /// Water flow presets, in device order
    #[serde(default)]
    pub water_levels: Vec<NamedMode>,
    /// Mop route presets, in device order
    #[serde(default)]
    pub mop_modes: Vec<NamedMode>,
    /// Tracked consumables
    #[serde(default)]
    pub consumables: Vec<String>,
}

impl CapabilitySet {
    /// Baseline set for a model the table does not know
    pub fn baseline(model: impl Into<String>, firmware: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            firmware: firmware.into(),
            supported: Capability::BASELINE.into_iter().collect(),
            fan_speeds: Vec::new(),
            water_levels: Vec::new(),
            mop_modes: Vec::new(),
            consumables: table::default_consumables(),
        }
    }

    /// Whether the capability is supported
    pub fn supports(&self, capability: Capability) -> bool {
        self.supported.contains(&capability)
    }

    /// Fail with `UnsupportedCapability` unless supported
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(RobovacError::UnsupportedCapability {
                capability,
                model: self.model.clone(),
            })
        }
    }

    /// Fan preset by name
    pub fn fan_speed(&self, name: &str) -> Option<&NamedMode> {
        find_mode(&self.fan_speeds, name)
    }

    /// Water preset by name
    pub fn water_level(&self, name: &str) -> Option<&NamedMode> {
        find_mode(&self.water_levels, name)
    }

    /// Mop route preset by name
    pub fn mop_mode(&self, name: &str) -> Option<&NamedMode> {
        find_mode(&self.mop_modes, name)
    }

    /// Supported capabilities in stable order
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.supported.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_names_parse_back() {
        for cap in Capability::ALL {
            assert_eq!(cap.as_str().parse::<Capability>().unwrap(), cap);
            assert_eq!(
                serde_json::to_value(cap).unwrap(),
                serde_json::Value::String(cap.to_string())
            );
        }
        assert!("teleport".parse::<Capability>().is_err());
    }

    #[test]
    fn test_baseline_set() {
        let set = CapabilitySet::baseline("acme.vacuum.x1", "1.0.0");
        assert!(set.supports(Capability::Start));
        assert!(set.supports(Capability::Consumables));
        assert!(!set.supports(Capability::SegmentCleaning));
        assert_eq!(set.consumables.len(), 4);

        let err = set.require(Capability::ZoneCleaning).unwrap_err();
        assert!(matches!(
            err,
            RobovacError::UnsupportedCapability {
                capability: Capability::ZoneCleaning,
                ..
            }
        ));
        assert!(err.to_string().contains("zone_cleaning"));
    }

    #[test]
    fn test_mode_lookup_case_insensitive() {
        let mut set = CapabilitySet::baseline("m", "1");
        set.fan_speeds = vec![NamedMode::new("quiet", 101), NamedMode::new("turbo", 103)];
        assert_eq!(set.fan_speed("Turbo").map(|m| m.code), Some(103));
        assert!(set.fan_speed("max").is_none());
    }
}
