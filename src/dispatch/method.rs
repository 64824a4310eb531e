//! Method catalogue.

use std::fmt;
use std::str::FromStr;

use crate::capability::Capability;
use crate::model::StateCode;

/// A device method, by wire name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// `get_status`
    GetStatus,
    /// `app_start`
    AppStart,
    /// `app_stop`
    AppStop,
    /// `app_pause`
    AppPause,
    /// `app_charge`: return to dock
    AppCharge,
    /// `find_me`: play the locator sound
    FindMe,
    /// `app_spot`
    AppSpot,
    /// `app_zoned_clean`
    AppZonedClean,
    /// `app_segment_clean`: clean rooms
    AppSegmentClean,
    /// `app_goto_target`
    AppGotoTarget,
    /// `get_consumable`
    GetConsumable,
    /// `reset_consumable`
    ResetConsumable,
    /// `set_custom_mode`: fan speed
    SetCustomMode,
    /// `set_water_box_custom_mode`: water level
    SetWaterBoxCustomMode,
    /// `set_mop_mode`
    SetMopMode,
    /// `get_map_v1`
    GetMap,
    /// `get_room_mapping`
    GetRoomMapping,
    /// `name_segment`
    NameSegment,
    /// `reset_map`
    ResetMap,
    /// `load_multi_map`: switch floors
    LoadMultiMap,
    /// `set_carpet_mode`
    SetCarpetMode,
    /// `set_child_lock`
    SetChildLock,
    /// `set_dnd_timer`
    SetDndTimer,
    /// `change_sound_volume`
    ChangeSoundVolume,
    /// `set_clean_sequence`: passes per clean
    SetCleanSequence,
    /// `app_start_collect_dust`
    AppStartCollectDust,
    /// `set_server_timer`: schedules
    SetServerTimer,
    /// Any other method, passed through unchecked
    Custom(String),
}

impl Method {
    /// Every named method
    pub const KNOWN: [Method; 27] = [
        Self::GetStatus,
        Self::AppStart,
        Self::AppStop,
        Self::AppPause,
        Self::AppCharge,
        Self::FindMe,
        Self::AppSpot,
        Self::AppZonedClean,
        Self::AppSegmentClean,
        Self::AppGotoTarget,
        Self::GetConsumable,
        Self::ResetConsumable,
        Self::SetCustomMode,
        Self::SetWaterBoxCustomMode,
        Self::SetMopMode,
        Self::GetMap,
        Self::GetRoomMapping,
        Self::NameSegment,
        Self::ResetMap,
        Self::LoadMultiMap,
        Self::SetCarpetMode,
        Self::SetChildLock,
        Self::SetDndTimer,
        Self::ChangeSoundVolume,
        Self::SetCleanSequence,
        Self::AppStartCollectDust,
        Self::SetServerTimer,
    ];

    /// Wire name
    pub fn as_str(&self) -> &str {
        match self {
            Self::GetStatus => "get_status",
            Self::AppStart => "app_start",
            Self::AppStop => "app_stop",
            Self::AppPause => "app_pause",
            Self::AppCharge => "app_charge",
            Self::FindMe => "find_me",
            Self::AppSpot => "app_spot",
            Self::AppZonedClean => "app_zoned_clean",
            Self::AppSegmentClean => "app_segment_clean",
            Self::AppGotoTarget => "app_goto_target",
            Self::GetConsumable => "get_consumable",
            Self::ResetConsumable => "reset_consumable",
            Self::SetCustomMode => "set_custom_mode",
            Self::SetWaterBoxCustomMode => "set_water_box_custom_mode",
            Self::SetMopMode => "set_mop_mode",
            Self::GetMap => "get_map_v1",
            Self::GetRoomMapping => "get_room_mapping",
            Self::NameSegment => "name_segment",
            Self::ResetMap => "reset_map",
            Self::LoadMultiMap => "load_multi_map",
            Self::SetCarpetMode => "set_carpet_mode",
            Self::SetChildLock => "set_child_lock",
            Self::SetDndTimer => "set_dnd_timer",
            Self::ChangeSoundVolume => "change_sound_volume",
            Self::SetCleanSequence => "set_clean_sequence",
            Self::AppStartCollectDust => "app_start_collect_dust",
            Self::SetServerTimer => "set_server_timer",
            Self::Custom(name) => name,
        }
    }

    /// Method for a wire name; unknown names become [`Method::Custom`]
    pub fn from_wire(name: &str) -> Self {
        Self::KNOWN
            .iter()
            .find(|method| method.as_str() == name)
            .cloned()
            .unwrap_or_else(|| Self::Custom(name.to_string()))
    }

    /// Capability the device must have for this method
    pub fn required_capability(&self) -> Option<Capability> {
        let capability = match self {
            Self::GetStatus => Capability::Status,
            Self::AppStart => Capability::Start,
            Self::AppStop => Capability::Stop,
            Self::AppPause => Capability::Pause,
            Self::AppCharge => Capability::ReturnToDock,
            Self::FindMe => Capability::Locate,
            Self::AppSpot => Capability::SpotCleaning,
            Self::AppZonedClean => Capability::ZoneCleaning,
            Self::AppSegmentClean => Capability::SegmentCleaning,
            Self::AppGotoTarget => Capability::GotoTarget,
            Self::GetConsumable => Capability::Consumables,
            Self::ResetConsumable => Capability::ConsumableReset,
            Self::SetCustomMode => Capability::FanSpeed,
            Self::SetWaterBoxCustomMode => Capability::WaterLevel,
            Self::SetMopMode => Capability::MopMode,
            Self::GetMap => Capability::MapRetrieval,
            Self::GetRoomMapping | Self::NameSegment => Capability::RoomNaming,
            Self::ResetMap => Capability::MapReset,
            Self::LoadMultiMap => Capability::MultiFloor,
            Self::SetCarpetMode => Capability::CarpetBoost,
            Self::SetChildLock => Capability::ChildLock,
            Self::SetDndTimer => Capability::DoNotDisturb,
            Self::ChangeSoundVolume => Capability::SoundVolume,
            Self::SetCleanSequence => Capability::CleaningPasses,
            Self::AppStartCollectDust => Capability::DustCollection,
            Self::SetServerTimer => Capability::Schedules,
            Self::Custom(_) => return None,
        };
        Some(capability)
    }

    /// Whether the response only acknowledges receipt; the effect shows
    /// up later in the status
    pub fn is_ack_only(&self) -> bool {
        !self.confirming_states().is_empty() || matches!(self, Self::FindMe)
    }

    /// States that show the method took effect
    pub fn confirming_states(&self) -> &'static [StateCode] {
        match self {
            Self::AppStart => &[StateCode::Cleaning],
            Self::AppStop => &[
                StateCode::Idle,
                StateCode::Charging,
                StateCode::ChargingComplete,
            ],
            Self::AppPause => &[StateCode::Paused, StateCode::Idle],
            Self::AppCharge => &[
                StateCode::ReturningHome,
                StateCode::Docking,
                StateCode::Charging,
                StateCode::ChargingComplete,
            ],
            Self::AppSpot => &[StateCode::SpotCleaning],
            Self::AppZonedClean => &[StateCode::ZonedCleaning],
            Self::AppSegmentClean => &[StateCode::SegmentCleaning],
            Self::AppGotoTarget => &[StateCode::GoingToTarget],
            Self::AppStartCollectDust => &[StateCode::EmptyingBin],
            _ => &[],
        }
    }

    /// Whether `state` confirms this method
    pub fn confirmed_by(&self, state: StateCode) -> bool {
        self.confirming_states().contains(&state)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_wire(s))
    }
}
