//! Device status as reported by `get_status` and status events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Vacuum state codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum StateCode {
    /// Booting
    Starting,
    /// Lifted off the charger without being told to
    ChargerDisconnected,
    /// Idle, off the dock
    Idle,
    /// Remote control active
    RemoteControl,
    /// Full clean in progress
    Cleaning,
    /// Returning to dock
    ReturningHome,
    /// Manual mode
    ManualMode,
    /// Charging on the dock
    Charging,
    /// Dock contact problem
    ChargingProblem,
    /// Paused
    Paused,
    /// Spot cleaning
    SpotCleaning,
    /// Stopped on error
    Error,
    /// Shutting down
    ShuttingDown,
    /// Firmware update in progress
    Updating,
    /// Docking
    Docking,
    /// Driving to a target point
    GoingToTarget,
    /// Zone cleaning
    ZonedCleaning,
    /// Room (segment) cleaning
    SegmentCleaning,
    /// Dock emptying the dustbin
    EmptyingBin,
    /// Dock washing the mop
    WashingMop,
    /// Driving to the mop wash station
    GoingToWashMop,
    /// On the dock, fully charged
    ChargingComplete,
    /// Device reported offline
    Offline,
    /// Code not known to this crate
    Unknown(i64),
}

impl From<i64> for StateCode {
    fn from(code: i64) -> Self {
        match code {
            1 => Self::Starting,
            2 => Self::ChargerDisconnected,
            3 => Self::Idle,
            4 => Self::RemoteControl,
            5 => Self::Cleaning,
            6 => Self::ReturningHome,
            7 => Self::ManualMode,
            8 => Self::Charging,
            9 => Self::ChargingProblem,
            10 => Self::Paused,
            11 => Self::SpotCleaning,
            12 => Self::Error,
            13 => Self::ShuttingDown,
            14 => Self::Updating,
            15 => Self::Docking,
            16 => Self::GoingToTarget,
            17 => Self::ZonedCleaning,
            18 => Self::SegmentCleaning,
            22 => Self::EmptyingBin,
            23 => Self::WashingMop,
            26 => Self::GoingToWashMop,
            100 => Self::ChargingComplete,
            101 => Self::Offline,
            other => Self::Unknown(other),
        }
    }
}

impl From<StateCode> for i64 {
    fn from(state: StateCode) -> Self {
        match state {
            StateCode::Starting => 1,
            StateCode::ChargerDisconnected => 2,
            StateCode::Idle => 3,
            StateCode::RemoteControl => 4,
            StateCode::Cleaning => 5,
            StateCode::ReturningHome => 6,
            StateCode::ManualMode => 7,
            StateCode::Charging => 8,
            StateCode::ChargingProblem => 9,
            StateCode::Paused => 10,
            StateCode::SpotCleaning => 11,
            StateCode::Error => 12,
            StateCode::ShuttingDown => 13,
            StateCode::Updating => 14,
            StateCode::Docking => 15,
            StateCode::GoingToTarget => 16,
            StateCode::ZonedCleaning => 17,
            StateCode::SegmentCleaning => 18,
            StateCode::EmptyingBin => 22,
            StateCode::WashingMop => 23,
            StateCode::GoingToWashMop => 26,
            StateCode::ChargingComplete => 100,
            StateCode::Offline => 101,
            StateCode::Unknown(code) => code,
        }
    }
}

impl StateCode {
    /// Sitting on the dock
    pub fn is_docked(self) -> bool {
        matches!(
            self,
            Self::Charging | Self::ChargingComplete | Self::EmptyingBin | Self::WashingMop
        )
    }

    /// Any cleaning activity
    pub fn is_cleaning(self) -> bool {
        matches!(
            self,
            Self::Cleaning | Self::SpotCleaning | Self::ZonedCleaning | Self::SegmentCleaning
        )
    }

    /// States from which a room clean may be started
    pub fn accepts_room_clean(self) -> bool {
        matches!(self, Self::Idle | Self::Charging | Self::ChargingComplete)
    }
}

/// Dustbin fill state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DustbinState {
    /// Empty
    Empty,
    /// Partly full
    Partial,
    /// Full; needs emptying
    Full,
    /// Bin taken out of the robot
    Removed,
}

impl DustbinState {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Empty),
            1 => Some(Self::Partial),
            2 => Some(Self::Full),
            3 => Some(Self::Removed),
            _ => None,
        }
    }
}

/// Cleaning sequence of the running clean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleaningSequence {
    /// Whole-home automatic route
    Auto,
    /// Edges only
    Edge,
    /// Spot around the robot
    Spot,
    /// One room
    SingleRoom,
    /// Rectangular zones
    Zone,
}

impl CleaningSequence {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Auto),
            1 => Some(Self::Edge),
            2 => Some(Self::Spot),
            3 => Some(Self::SingleRoom),
            4 => Some(Self::Zone),
            _ => None,
        }
    }
}

/// What the robot is navigating for, from the `in_cleaning` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationState {
    /// Not cleaning
    Idle,
    /// Full clean, building the map as it goes
    Mapping,
    /// Zone clean
    ZoneCleaning,
    /// Room clean
    SegmentCleaning,
    /// Spot clean
    SpotCleaning,
}

impl NavigationState {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Idle),
            1 => Some(Self::Mapping),
            2 => Some(Self::ZoneCleaning),
            3 => Some(Self::SegmentCleaning),
            4 => Some(Self::SpotCleaning),
            _ => None,
        }
    }
}

/// Decoded device status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Current state
    pub state: StateCode,
    /// Battery percentage
    #[serde(default)]
    pub battery: u8,
    /// Non-zero while an error is active
    #[serde(default)]
    pub error_code: i64,
    /// Fan preset code
    #[serde(default)]
    pub fan_power: Option<u32>,
    /// Water box: 1 when attached
    #[serde(default)]
    pub water_box_status: Option<u8>,
    /// Water level code
    #[serde(default)]
    pub water_box_mode: Option<u32>,
    /// Mop route code
    #[serde(default)]
    pub mop_mode: Option<u32>,
    /// Seconds spent in the current/last clean
    #[serde(default)]
    pub clean_time: u64,
    /// Area of the current/last clean in mm²
    #[serde(default)]
    pub clean_area: u64,
    /// Do-not-disturb: 1 when enabled
    #[serde(default)]
    pub dnd_enabled: Option<u8>,
    /// Carpet boost: 1 when enabled
    #[serde(default)]
    pub carpet_mode: Option<u8>,
    /// Child lock: 1 when enabled
    #[serde(default)]
    pub child_lock: Option<u8>,
    /// Passes per clean
    #[serde(default)]
    pub clean_passes: Option<u8>,
    /// Speaker volume 0..=100
    #[serde(default)]
    pub sound_volume: Option<u8>,
    /// Water tank level in percent
    #[serde(default)]
    pub water_percent: Option<u8>,
    /// Dustbin code: 0 empty, 1 partial, 2 full, 3 removed
    #[serde(default, alias = "dustbin_full")]
    pub dustbin_status: Option<u8>,
    /// Wi-Fi signal strength in dBm
    #[serde(default)]
    pub wifi_rssi: Option<i32>,
    /// Progress of the running zone clean in percent
    #[serde(default)]
    pub zone_progress: Option<u8>,
    /// Cleaning sequence code
    #[serde(default)]
    pub cleaning_mode: Option<u8>,
    /// Unix time of the last error
    #[serde(default)]
    pub last_error_time: Option<i64>,
    /// Pass of the running clean, from 1
    #[serde(default)]
    pub cleaning_pass: Option<u8>,
    /// Navigation code of the running clean
    #[serde(default)]
    pub in_cleaning: Option<u8>,
}

impl DeviceStatus {
    /// Decode a `get_status` result or a status push
    pub fn from_value(value: &serde_json::Value) -> crate::error::Result<Self> {
        serde_json::from_value(super::unwrap_single(value).clone())
            .map_err(|e| crate::error::RobovacError::Decode(format!("Invalid status: {e}")))
    }

    /// Status with only a state; everything else defaulted
    pub fn with_state(state: StateCode) -> Self {
        Self {
            state,
            battery: 0,
            error_code: 0,
            fan_power: None,
            water_box_status: None,
            water_box_mode: None,
            mop_mode: None,
            clean_time: 0,
            clean_area: 0,
            dnd_enabled: None,
            carpet_mode: None,
            child_lock: None,
            clean_passes: None,
            sound_volume: None,
            water_percent: None,
            dustbin_status: None,
            wifi_rssi: None,
            zone_progress: None,
            cleaning_mode: None,
            last_error_time: None,
            cleaning_pass: None,
            in_cleaning: None,
        }
    }

    /// Sitting on the dock
    pub fn is_docked(&self) -> bool {
        self.state.is_docked()
    }

    /// An error is active
    pub fn has_error(&self) -> bool {
        self.error_code != 0 || self.state == StateCode::Error
    }

    /// Any cleaning activity
    pub fn is_cleaning(&self) -> bool {
        self.state.is_cleaning()
    }

    /// Water box attached
    pub fn is_mopping(&self) -> bool {
        self.water_box_status == Some(1)
    }

    /// Do-not-disturb enabled
    pub fn dnd_active(&self) -> bool {
        self.dnd_enabled == Some(1)
    }

    /// Carpet boost enabled
    pub fn carpet_boost(&self) -> bool {
        self.carpet_mode == Some(1)
    }

    /// Clean area in square metres
    pub fn clean_area_m2(&self) -> f64 {
        self.clean_area as f64 / 1_000_000.0
    }

    /// Dustbin fill state, when reported
    pub fn dustbin(&self) -> Option<DustbinState> {
        self.dustbin_status.and_then(DustbinState::from_code)
    }

    /// Cleaning sequence, when reported
    pub fn cleaning_sequence(&self) -> Option<CleaningSequence> {
        self.cleaning_mode.and_then(CleaningSequence::from_code)
    }

    /// Navigation state, when reported
    pub fn navigation(&self) -> Option<NavigationState> {
        self.in_cleaning.and_then(NavigationState::from_code)
    }

    /// Time of the last error
    pub fn last_error_at(&self) -> Option<DateTime<Utc>> {
        self.last_error_time
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }

    /// Current pass of the running clean; 1 when not reported
    pub fn current_pass(&self) -> u8 {
        self.cleaning_pass.unwrap_or(1).max(1)
    }

    /// Whether a room clean may be started now
    pub fn can_start_room_clean(&self) -> bool {
        self.state.accepts_room_clean() && !self.has_error()
    }
}
