//! Device data model.
//!
//! Identity and configuration of a device, the decoded status and
//! consumable payloads, and the events fanned out to subscribers.

mod consumable;
mod event;
mod status;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::NamedMode;
use crate::codec::crypto::KeyMaterial;
use crate::error::Result;

pub use consumable::{ConsumableKind, Consumables, MAINTENANCE_ALERT_THRESHOLD};
pub use event::{DeviceEvent, EventKind};
pub use status::{CleaningSequence, DeviceStatus, DustbinState, NavigationState, StateCode};

/// Query results arrive either bare or wrapped in a one-element array
pub(crate) fn unwrap_single(value: &serde_json::Value) -> &serde_json::Value {
    match value.as_array() {
        Some(items) if items.len() == 1 => &items[0],
        _ => value,
    }
}

/// Device identifier (the vendor "duid")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new device id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Static configuration of one device
#[derive(Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device identifier
    pub id: DeviceId,

    /// Friendly name
    #[serde(default)]
    pub name: Option<String>,

    /// Pre-shared local key
    pub local_key: String,

    /// `host:port` for direct local connections
    #[serde(default)]
    pub local_addr: Option<String>,

    /// Whether the broker relay may be used for this device
    #[serde(default = "default_true")]
    pub relay: bool,
}

fn default_true() -> bool {
    true
}

impl DeviceConfig {
    /// Minimal config with only id and key
    pub fn new(id: impl Into<DeviceId>, local_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            local_key: local_key.into(),
            local_addr: None,
            relay: true,
        }
    }

    /// Set the direct local address
    pub fn with_local_addr(mut self, addr: impl Into<String>) -> Self {
        self.local_addr = Some(addr.into());
        self
    }

    /// Set the friendly name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Allow or forbid the relay
    pub fn with_relay(mut self, relay: bool) -> Self {
        self.relay = relay;
        self
    }

    /// Name for display, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    /// Parsed local key
    pub fn key_material(&self) -> Result<KeyMaterial> {
        Ok(KeyMaterial::from_local_key(&self.local_key)
            .map_err(crate::codec::crypto::CryptoError::from)?)
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("local_key", &"[REDACTED]")
            .field("local_addr", &self.local_addr)
            .field("relay", &self.relay)
            .finish()
    }
}

/// What a device told us about itself during the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Device identifier
    pub duid: DeviceId,
    /// Model designator, e.g. `roborock.vacuum.a15`
    pub model: String,
    /// Firmware version string as reported
    pub firmware: String,
    /// Device-reported capability flags, keyed by capability name
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    /// Device-reported fan presets, replacing the table's
    #[serde(default)]
    pub fan_speeds: Option<Vec<NamedMode>>,
    /// Device-reported water levels, replacing the table's
    #[serde(default)]
    pub water_levels: Option<Vec<NamedMode>>,
    /// Device-reported mop routes, replacing the table's
    #[serde(default)]
    pub mop_modes: Option<Vec<NamedMode>>,
}

impl DeviceIdentity {
    /// Identity with no device-reported overrides
    pub fn new(duid: impl Into<DeviceId>, model: impl Into<String>, firmware: impl Into<String>) -> Self {
        Self {
            duid: duid.into(),
            model: model.into(),
            firmware: firmware.into(),
            features: BTreeMap::new(),
            fan_speeds: None,
            water_levels: None,
            mop_modes: None,
        }
    }

    /// Add a device-reported capability flag
    pub fn with_feature(mut self, name: impl Into<String>, supported: bool) -> Self {
        self.features.insert(name.into(), supported);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_config_debug_redacts_key() {
        let config = DeviceConfig::new("duid-1", "aB3dE5gH7jK9mN1p");
        let debug = format!("{config:?}");
        assert!(!debug.contains("aB3dE5gH7jK9mN1p"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_device_config_defaults_from_toml() {
        let config: DeviceConfig = toml::from_str(
            r#"
            id = "duid-1"
            local_key = "aB3dE5gH7jK9mN1p"
            "#,
        )
        .unwrap();
        assert!(config.relay);
        assert_eq!(config.display_name(), "duid-1");
        assert!(config.key_material().is_ok());
    }

    #[test]
    fn test_short_local_key_rejected() {
        let config = DeviceConfig::new("duid-1", "short");
        assert!(config.key_material().is_err());
    }

    #[test]
    fn test_identity_json() {
        let identity: DeviceIdentity = serde_json::from_str(
            r#"{"duid":"d1","model":"roborock.vacuum.a15","firmware":"02.16.26","features":{"mop_mode":true}}"#,
        )
        .unwrap();
        assert_eq!(identity.duid, DeviceId::from("d1"));
        assert_eq!(identity.features.get("mop_mode"), Some(&true));
        assert!(identity.fan_speeds.is_none());
    }
}
