//! Firmware version ordering.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Dotted firmware version, e.g. `02.16.26` or `3.5.8_1486`.
///
/// Components are compared numerically; missing trailing components count
/// as zero, so `2.10` equals `02.10.00`.
#[derive(Debug, Clone)]
pub struct FirmwareVersion {
    parts: Vec<u32>,
    raw: String,
}

impl FirmwareVersion {
    /// Parse a version string. Returns `None` for anything non-numeric.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_start_matches(['v', 'V']);
        if trimmed.is_empty() {
            return None;
        }
        let parts = trimmed
            .split(['.', '_'])
            .map(|part| part.parse::<u32>().ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            parts,
            raw: raw.trim().to_string(),
        })
    }

    /// Numeric components
    pub fn parts(&self) -> &[u32] {
        &self.parts
    }

    /// Whether the version lies in `[min, max)`; open ends are unbounded
    pub fn in_range(&self, min: Option<&FirmwareVersion>, max: Option<&FirmwareVersion>) -> bool {
        min.is_none_or(|min| self >= min) && max.is_none_or(|max| self < max)
    }
}

impl PartialEq for FirmwareVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FirmwareVersion {}

impl PartialOrd for FirmwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FirmwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl FromStr for FirmwareVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid firmware version: {s}"))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
