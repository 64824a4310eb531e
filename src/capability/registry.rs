//! Capability registry with a per-device cache.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;

use super::{Capability, CapabilitySet, CapabilityTable};
use crate::config::CapabilityConfig;
use crate::error::Result;
use crate::model::{DeviceId, DeviceIdentity};

#[derive(Debug)]
struct CachedSet {
    model: String,
    firmware: String,
    set: Arc<CapabilitySet>,
}

/// Resolves and caches effective capability sets
#[derive(Debug)]
pub struct CapabilityRegistry {
    table: CapabilityTable,
    cache: DashMap<DeviceId, CachedSet>,
}

impl CapabilityRegistry {
    /// Registry over an already parsed table
    pub fn new(table: CapabilityTable) -> Self {
        Self {
            table,
            cache: DashMap::new(),
        }
    }

    /// Registry over the built-in table
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(CapabilityTable::builtin()?))
    }

    /// Registry over a table document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(Self::new(CapabilityTable::from_toml_str(content)?))
    }

    /// Registry over a table file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "Loaded capability table");
        Self::from_toml_str(&content)
    }

    /// External table when configured or installed, built-in otherwise
    pub fn from_config(config: &CapabilityConfig) -> Result<Self> {
        match config.resolve_path() {
            Some(path) => Self::from_path(path),
            None => Self::builtin(),
        }
    }

    /// The underlying table
    pub fn table(&self) -> &CapabilityTable {
        &self.table
    }

    /// Capabilities of a model/firmware pair from the table alone
    pub fn capabilities_for(&self, model: &str, firmware: &str) -> CapabilitySet {
        self.table.lookup(model, firmware)
    }

    /// Effective capabilities of a device after its handshake.
    ///
    /// The cached set is reused while model and firmware stay the same.
    /// Flags the device reported override the table in both directions.
    pub fn resolve(&self, device: &DeviceId, identity: &DeviceIdentity) -> Arc<CapabilitySet> {
        if let Some(cached) = self.cache.get(device) {
            if cached.model == identity.model && cached.firmware == identity.firmware {
                return Arc::clone(&cached.set);
            }
        }

        let mut set = self.capabilities_for(&identity.model, &identity.firmware);
        apply_device_flags(&mut set, identity);

        tracing::debug!(
            device = %device,
            model = %identity.model,
            firmware = %identity.firmware,
            capabilities = set.supported.len(),
            "Resolved capabilities"
        );

        let set = Arc::new(set);
        self.cache.insert(
            device.clone(),
            CachedSet {
                model: identity.model.clone(),
                firmware: identity.firmware.clone(),
                set: Arc::clone(&set),
            },
        );
        set
    }

    /// Cached set for a device, if resolved
    pub fn cached(&self, device: &DeviceId) -> Option<Arc<CapabilitySet>> {
        self.cache.get(device).map(|cached| Arc::clone(&cached.set))
    }

    /// Drop the cached set for a device
    pub fn invalidate(&self, device: &DeviceId) {
        self.cache.remove(device);
    }
}

fn apply_device_flags(set: &mut CapabilitySet, identity: &DeviceIdentity) {
    for (name, supported) in &identity.features {
        match name.parse::<Capability>() {
            Ok(capability) if *supported => {
                set.supported.insert(capability);
            }
            Ok(capability) => {
                set.supported.remove(&capability);
            }
            Err(_) => {
                tracing::debug!(feature = %name, "Ignoring unknown device feature flag");
            }
        }
    }
    if let Some(modes) = &identity.fan_speeds {
        set.fan_speeds = modes.clone();
    }
    if let Some(modes) = &identity.water_levels {
        set.water_levels = modes.clone();
    }
    if let Some(modes) = &identity.mop_modes {
        set.mop_modes = modes.clone();
    }
}
