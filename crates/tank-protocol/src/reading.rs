//! Typed tank readings

use crate::fluid::{FluidType, TankStatus};

/// One decoded tank reading
///
/// Optional fields are `None` when the feed did not supply them or supplied
/// an invalid value. Readings are transient and never persisted.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TankReading {
    /// Fill level in percent, `None` when invalid
    pub level: Option<f64>,
    /// Capacity in cubic meters
    pub capacity: Option<f64>,
    /// Fluid type
    pub fluid_type: Option<FluidType>,
    /// Remaining volume in cubic meters; `None` means derive from level and capacity
    pub remaining: Option<f64>,
    /// Resistive sender reading in ohms
    pub resistance_ohm: Option<f64>,
    /// Sensor status
    pub status: TankStatus,
}

impl TankReading {
    /// Remaining volume, derived from capacity and level when not reported
    pub fn remaining_or_derived(&self) -> Option<f64> {
        self.remaining.or_else(|| match (self.capacity, self.level) {
            (Some(capacity), Some(level)) => Some(capacity * level / 100.0),
            _ => None,
        })
    }

    /// Format level for display
    pub fn level_display(&self) -> String {
        match (self.status.is_ok(), self.level) {
            (false, _) => self.status.description().to_string(),
            (true, Some(level)) => format!("{:.0}%", level),
            (true, None) => "---".to_string(),
        }
    }
}
