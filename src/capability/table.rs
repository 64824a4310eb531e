//! Versioned capability table.
//!
//! ```toml
//! version = 1
//! baseline = ["status", "start", "stop"]
//!
//! [[models]]
//! id = "roborock.vacuum.a34"
//! aliases = ["q5"]
//! capabilities = ["status", "start", "segment_cleaning"]
//! fan_speeds = [{ name = "quiet", code = 101 }]
//!
//! [[models.firmware]]
//! capability = "zone_cleaning"
//! min = "02.10.00"
//! ```
//!
//! A gated capability is supported only when at least one of its gates
//! matches the firmware, whether or not it is also listed unconditionally.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{Capability, CapabilitySet, FirmwareVersion, NamedMode};
use crate::error::{Result, RobovacError};

/// Table format version understood by this crate
pub const TABLE_VERSION: u32 = 1;

/// Built-in table
pub(crate) const DEFAULT_TABLE: &str = include_str!("default_table.toml");

pub(crate) fn default_consumables() -> Vec<String> {
    ["main_brush", "side_brush", "filter", "sensor"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// A firmware range that enables one capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareGate {
    /// Capability switched on by this gate
    pub capability: Capability,
    /// Inclusive lower bound
    #[serde(default)]
    pub min: Option<String>,
    /// Exclusive upper bound
    #[serde(default)]
    pub max: Option<String>,
}

impl FirmwareGate {
    /// Whether the firmware satisfies this gate. Unparseable firmware never does.
    pub fn matches(&self, firmware: &str) -> bool {
        let Some(version) = FirmwareVersion::parse(firmware) else {
            return false;
        };
        let min = self.min.as_deref().and_then(FirmwareVersion::parse);
        let max = self.max.as_deref().and_then(FirmwareVersion::parse);
        version.in_range(min.as_ref(), max.as_ref())
    }

    fn check(&self, model: &str) -> Result<()> {
        for bound in [&self.min, &self.max].into_iter().flatten() {
            if FirmwareVersion::parse(bound).is_none() {
                return Err(RobovacError::Config(format!(
                    "Model {model}: invalid firmware bound {bound:?} for {}",
                    self.capability
                )));
            }
        }
        Ok(())
    }
}

/// One model's table entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Model designator
    pub id: String,
    /// Marketing name
    #[serde(default)]
    pub name: Option<String>,
    /// Alternative identifiers
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Unconditional capabilities
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Firmware-dependent capabilities
    #[serde(default)]
    pub firmware: Vec<FirmwareGate>,
    /// Fan presets
    #[serde(default)]
    pub fan_speeds: Vec<NamedMode>,
    /// Water presets
    #[serde(default)]
    pub water_levels: Vec<NamedMode>,
    /// Mop route presets
    #[serde(default)]
    pub mop_modes: Vec<NamedMode>,
    /// Tracked consumables; empty means the standard four
    #[serde(default)]
    pub consumables: Vec<String>,
}

impl ModelEntry {
    /// Whether `model` names this entry (case-insensitive)
    pub fn matches(&self, model: &str) -> bool {
        self.id.eq_ignore_ascii_case(model)
            || self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(model))
    }

    /// Capability set for a firmware version
    pub fn resolve(&self, firmware: &str) -> CapabilitySet {
        let gated: BTreeSet<Capability> = self.firmware.iter().map(|g| g.capability).collect();
        let mut supported: BTreeSet<Capability> = self
            .capabilities
            .iter()
            .copied()
            .filter(|cap| !gated.contains(cap))
            .collect();
        supported.extend(
            self.firmware
                .iter()
                .filter(|gate| gate.matches(firmware))
                .map(|gate| gate.capability),
        );

        CapabilitySet {
            model: self.id.clone(),
            firmware: firmware.to_string(),
            supported,
            fan_speeds: self.fan_speeds.clone(),
            water_levels: self.water_levels.clone(),
            mop_modes: self.mop_modes.clone(),
            consumables: if self.consumables.is_empty() {
                default_consumables()
            } else {
                self.consumables.clone()
            },
        }
    }
}

/// The whole table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityTable {
    /// Format version
    pub version: u32,
    /// Capabilities for unknown models
    #[serde(default = "default_baseline")]
    pub baseline: Vec<Capability>,
    /// Known models
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

fn default_baseline() -> Vec<Capability> {
    Capability::BASELINE.to_vec()
}

impl CapabilityTable {
    /// Parse and validate a table document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: Self = toml::from_str(content)?;
        table.validate()?;
        Ok(table)
    }

    /// Built-in table
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(DEFAULT_TABLE)
    }

    /// Reject unknown versions, duplicate model names and bad bounds
    pub fn validate(&self) -> Result<()> {
        if self.version != TABLE_VERSION {
            return Err(RobovacError::Config(format!(
                "Unsupported capability table version {} (expected {TABLE_VERSION})",
                self.version
            )));
        }

        let mut seen = BTreeSet::new();
        for entry in &self.models {
            for name in std::iter::once(&entry.id).chain(&entry.aliases) {
                if !seen.insert(name.to_lowercase()) {
                    return Err(RobovacError::Config(format!(
                        "Model {name} appears twice in capability table"
                    )));
                }
            }
            for gate in &entry.firmware {
                gate.check(&entry.id)?;
            }
        }
        Ok(())
    }

    /// Entry for a model designator or alias
    pub fn entry(&self, model: &str) -> Option<&ModelEntry> {
        self.models.iter().find(|entry| entry.matches(model))
    }

    /// Capability set from the table alone (no device overrides)
    pub fn lookup(&self, model: &str, firmware: &str) -> CapabilitySet {
        match self.entry(model) {
            Some(entry) => entry.resolve(firmware),
            None => {
                let mut set = CapabilitySet::baseline(model, firmware);
                set.supported = self.baseline.iter().copied().collect();
                set
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const Q5_MODEL: &str = "roborock.vacuum.a34";

    #[test]
    fn test_builtin_table_loads() {
        let table = CapabilityTable::builtin().unwrap();
        assert_eq!(table.version, TABLE_VERSION);
        assert!(table.entry(Q5_MODEL).is_some());
        assert!(table.entry("Q5").is_some());
    }

    #[test]
    fn test_q5_zone_cleaning_gate() {
        let table = CapabilityTable::builtin().unwrap();
        let old = table.lookup(Q5_MODEL, "02.09.12");
        let new = table.lookup(Q5_MODEL, "02.10.00");
        let garbage = table.lookup(Q5_MODEL, "unknown");

        assert!(!old.supports(Capability::ZoneCleaning));
        assert!(new.supports(Capability::ZoneCleaning));
        assert!(!garbage.supports(Capability::ZoneCleaning));
        // Ungated capabilities do not depend on firmware
        assert!(old.supports(Capability::SegmentCleaning));
        assert!(garbage.supports(Capability::SegmentCleaning));
    }

    #[test]
    fn test_unknown_model_gets_baseline() {
        let table = CapabilityTable::builtin().unwrap();
        let set = table.lookup("acme.vacuum.x1", "1.0.0");
        assert_eq!(set.model, "acme.vacuum.x1");
        assert!(set.supports(Capability::Start));
        assert!(!set.supports(Capability::SegmentCleaning));
        assert!(!set.supports(Capability::Mopping));
    }

    #[test]
    fn test_gates_are_ored() {
        let table = CapabilityTable::from_toml_str(
            r#"
            version = 1

            [[models]]
            id = "m1"
            capabilities = ["status"]

            [[models.firmware]]
            capability = "mop_mode"
            min = "1.0"
            max = "2.0"

            [[models.firmware]]
            capability = "mop_mode"
            min = "3.0"
            "#,
        )
        .unwrap();
        assert!(table.lookup("m1", "1.5").supports(Capability::MopMode));
        assert!(!table.lookup("m1", "2.5").supports(Capability::MopMode));
        assert!(table.lookup("m1", "3.1").supports(Capability::MopMode));
    }

    #[test]
    fn test_rejects_wrong_version() {
        let err = CapabilityTable::from_toml_str("version = 2").unwrap_err();
        assert!(err.to_string().contains("version 2"));
    }

    #[test]
    fn test_rejects_duplicate_alias() {
        let result = CapabilityTable::from_toml_str(
            r#"
            version = 1
            [[models]]
            id = "a"
            aliases = ["x"]
            [[models]]
            id = "X"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_bound() {
        let result = CapabilityTable::from_toml_str(
            r#"
            version = 1
            [[models]]
            id = "a"
            [[models.firmware]]
            capability = "mopping"
            min = "latest"
            "#,
        );
        assert!(matches!(result, Err(RobovacError::Config(_))));
    }

    #[test]
    fn test_rejects_unknown_capability_name() {
        let result = CapabilityTable::from_toml_str(
            r#"
            version = 1
            [[models]]
            id = "a"
            capabilities = ["teleport"]
            "#,
        );
        assert!(result.is_err());
    }
}
