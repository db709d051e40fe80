//! Tank service attribute paths

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CodecError;
use crate::value::BusValue;

/// An attribute path on a tank service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TankPath {
    /// Fill level in percent (100 = full)
    Level,
    /// Tank capacity in cubic meters
    Capacity,
    /// Fluid type enumeration
    FluidType,
    /// Remaining volume in cubic meters
    Remaining,
    /// Sensor status enumeration
    Status,
    /// Resistive sender reading in ohms
    Resistance,
    /// Per-reading tank instance/channel number, when the feed provides one
    Instance,
    /// Service liveness flag (1/0)
    Connected,
    /// Operator-assigned display name
    CustomName,
}

impl TankPath {
    /// Every path, in publish order
    pub const ALL: [TankPath; 9] = [
        TankPath::Level,
        TankPath::Capacity,
        TankPath::FluidType,
        TankPath::Remaining,
        TankPath::Status,
        TankPath::Resistance,
        TankPath::Instance,
        TankPath::Connected,
        TankPath::CustomName,
    ];

    /// Bus path string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Level => "/Level",
            Self::Capacity => "/Capacity",
            Self::FluidType => "/FluidType",
            Self::Remaining => "/Remaining",
            Self::Status => "/Status",
            Self::Resistance => "/Resistance",
            Self::Instance => "/Instance",
            Self::Connected => "/Connected",
            Self::CustomName => "/CustomName",
        }
    }

    /// Whether this path is part of a tank reading (as opposed to service state)
    pub fn is_reading(&self) -> bool {
        matches!(
            self,
            Self::Level
                | Self::Capacity
                | Self::FluidType
                | Self::Remaining
                | Self::Status
                | Self::Resistance
        )
    }
}

impl fmt::Display for TankPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TankPath {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| CodecError::UnknownPath(s.to_string()))
    }
}

/// A set of raw attribute values, at most one per path
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawFields {
    fields: BTreeMap<TankPath, BusValue>,
}

impl RawFields {
    /// Create an empty field set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, replacing any previous one
    pub fn insert(&mut self, path: TankPath, value: impl Into<BusValue>) {
        self.fields.insert(path, value.into());
    }

    /// Builder-style insert
    pub fn with(mut self, path: TankPath, value: impl Into<BusValue>) -> Self {
        self.insert(path, value);
        self
    }

    /// Get the value at a path
    pub fn get(&self, path: TankPath) -> Option<&BusValue> {
        self.fields.get(&path)
    }

    /// Whether a path is present
    pub fn contains(&self, path: TankPath) -> bool {
        self.fields.contains_key(&path)
    }

    /// Remove a path
    pub fn remove(&mut self, path: TankPath) -> Option<BusValue> {
        self.fields.remove(&path)
    }

    /// Iterate over present paths in path order
    pub fn iter(&self) -> impl Iterator<Item = (TankPath, &BusValue)> {
        self.fields.iter().map(|(p, v)| (*p, v))
    }

    /// Number of present paths
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no path is present
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(TankPath, BusValue)> for RawFields {
    fn from_iter<I: IntoIterator<Item = (TankPath, BusValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
