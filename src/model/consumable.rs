//! Consumable wear tracking.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Consumables with less remaining life than this raise a maintenance alert
pub const MAINTENANCE_ALERT_THRESHOLD: Duration = Duration::from_secs(24 * 3600);

/// Replaceable parts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumableKind {
    /// Main roller brush
    MainBrush,
    /// Side brush
    SideBrush,
    /// Dust filter
    Filter,
    /// Cliff/wall sensors (cleaning interval)
    Sensor,
}

impl ConsumableKind {
    /// All kinds in display order
    pub const ALL: [Self; 4] = [Self::MainBrush, Self::SideBrush, Self::Filter, Self::Sensor];

    /// Rated service life
    pub fn lifespan(self) -> Duration {
        let hours = match self {
            Self::MainBrush => 300,
            Self::SideBrush => 200,
            Self::Filter => 150,
            Self::Sensor => 30,
        };
        Duration::from_secs(hours * 3600)
    }

    /// Counter name used by `get_consumable` and `reset_consumable`
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::MainBrush => "main_brush_work_time",
            Self::SideBrush => "side_brush_work_time",
            Self::Filter => "filter_work_time",
            Self::Sensor => "sensor_dirty_time",
        }
    }
}

impl fmt::Display for ConsumableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MainBrush => "main_brush",
            Self::SideBrush => "side_brush",
            Self::Filter => "filter",
            Self::Sensor => "sensor",
        };
        f.write_str(name)
    }
}

impl FromStr for ConsumableKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "main_brush" | "main_brush_work_time" => Ok(Self::MainBrush),
            "side_brush" | "side_brush_work_time" => Ok(Self::SideBrush),
            "filter" | "filter_work_time" => Ok(Self::Filter),
            "sensor" | "sensor_dirty_time" => Ok(Self::Sensor),
            _ => Err(format!("Unknown consumable: {s}")),
        }
    }
}

/// Work-time counters in seconds, as returned by `get_consumable`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumables {
    /// Main brush usage
    #[serde(default)]
    pub main_brush_work_time: u64,
    /// Side brush usage
    #[serde(default)]
    pub side_brush_work_time: u64,
    /// Filter usage
    #[serde(default)]
    pub filter_work_time: u64,
    /// Time since sensors were cleaned
    #[serde(default)]
    pub sensor_dirty_time: u64,
}

impl Consumables {
    /// Decode a `get_consumable` result or a consumables push
    pub fn from_value(value: &serde_json::Value) -> crate::error::Result<Self> {
        serde_json::from_value(super::unwrap_single(value).clone())
            .map_err(|e| crate::error::RobovacError::Decode(format!("Invalid consumables: {e}")))
    }

    /// Time used
    pub fn used(&self, kind: ConsumableKind) -> Duration {
        let secs = match kind {
            ConsumableKind::MainBrush => self.main_brush_work_time,
            ConsumableKind::SideBrush => self.side_brush_work_time,
            ConsumableKind::Filter => self.filter_work_time,
            ConsumableKind::Sensor => self.sensor_dirty_time,
        };
        Duration::from_secs(secs)
    }

    /// Remaining life, zero when overdue
    pub fn remaining(&self, kind: ConsumableKind) -> Duration {
        kind.lifespan().saturating_sub(self.used(kind))
    }

    /// Remaining life in percent (0..=100)
    pub fn percent_left(&self, kind: ConsumableKind) -> u8 {
        let left = self.remaining(kind).as_secs() * 100 / kind.lifespan().as_secs();
        left.min(100) as u8
    }

    /// Consumables due within [`MAINTENANCE_ALERT_THRESHOLD`]
    pub fn due(&self) -> Vec<ConsumableKind> {
        ConsumableKind::ALL
            .into_iter()
            .filter(|kind| self.remaining(*kind) < MAINTENANCE_ALERT_THRESHOLD)
            .collect()
    }

    /// Number of consumables due
    pub fn maintenance_alerts(&self) -> usize {
        self.due().len()
    }

    /// Counters after resetting one consumable
    pub fn with_reset(mut self, kind: ConsumableKind) -> Self {
        match kind {
            ConsumableKind::MainBrush => self.main_brush_work_time = 0,
            ConsumableKind::SideBrush => self.side_brush_work_time = 0,
            ConsumableKind::Filter => self.filter_work_time = 0,
            ConsumableKind::Sensor => self.sensor_dirty_time = 0,
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_parts_have_no_alerts() {
        let consumables = Consumables::default();
        assert_eq!(consumables.maintenance_alerts(), 0);
        assert_eq!(consumables.percent_left(ConsumableKind::Filter), 100);
    }

    #[test]
    fn test_alerts_count_parts_under_one_day() {
        let consumables = Consumables {
            // 10 hours left
            main_brush_work_time: 290 * 3600,
            // overdue
            side_brush_work_time: 250 * 3600,
            // exactly one day left is not yet due
            filter_work_time: 126 * 3600,
            sensor_dirty_time: 0,
        };
        assert_eq!(
            consumables.due(),
            vec![ConsumableKind::MainBrush, ConsumableKind::SideBrush]
        );
        assert_eq!(consumables.maintenance_alerts(), 2);
        assert_eq!(consumables.remaining(ConsumableKind::SideBrush), Duration::ZERO);
        assert_eq!(consumables.percent_left(ConsumableKind::SideBrush), 0);
    }

    #[test]
    fn test_reset_clears_counter() {
        let consumables = Consumables {
            sensor_dirty_time: 40 * 3600,
            ..Default::default()
        };
        assert_eq!(consumables.maintenance_alerts(), 1);
        assert_eq!(
            consumables.with_reset(ConsumableKind::Sensor).maintenance_alerts(),
            0
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!("main_brush".parse::<ConsumableKind>().unwrap(), ConsumableKind::MainBrush);
        assert_eq!(
            "filter_work_time".parse::<ConsumableKind>().unwrap(),
            ConsumableKind::Filter
        );
        assert!("mop".parse::<ConsumableKind>().is_err());
        assert_eq!(ConsumableKind::Sensor.wire_name(), "sensor_dirty_time");
        assert_eq!(ConsumableKind::SideBrush.to_string(), "side_brush");
    }
}
