//! Fluid type and sensor status enumerations
//!
//! Numeric codes follow the platform's tank service conventions.

use std::fmt;

/// Fluid stored in a tank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FluidType {
    /// Fuel (code 0)
    Fuel,
    /// Fresh water (code 1)
    FreshWater,
    /// Waste (gray) water (code 2)
    WasteWater,
    /// Live well (code 3)
    LiveWell,
    /// Oil (code 4)
    Oil,
    /// Black water / sewage (code 5)
    BlackWater,
    /// Any other code; the raw code is kept so it can be written back unchanged
    Unknown(i64),
}

impl FluidType {
    /// All named fluid types in code order
    pub const NAMED: [FluidType; 6] = [
        FluidType::Fuel,
        FluidType::FreshWater,
        FluidType::WasteWater,
        FluidType::LiveWell,
        FluidType::Oil,
        FluidType::BlackWater,
    ];

    /// Map a raw code; out-of-range codes become `Unknown`
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Fuel,
            1 => Self::FreshWater,
            2 => Self::WasteWater,
            3 => Self::LiveWell,
            4 => Self::Oil,
            5 => Self::BlackWater,
            other => Self::Unknown(other),
        }
    }

    /// Raw code
    pub fn code(&self) -> i64 {
        match self {
            Self::Fuel => 0,
            Self::FreshWater => 1,
            Self::WasteWater => 2,
            Self::LiveWell => 3,
            Self::Oil => 4,
            Self::BlackWater => 5,
            Self::Unknown(code) => *code,
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fuel => "Fuel",
            Self::FreshWater => "Fresh water",
            Self::WasteWater => "Waste water",
            Self::LiveWell => "Live well",
            Self::Oil => "Oil",
            Self::BlackWater => "Black water",
            Self::Unknown(_) => "Unknown",
        }
    }

    /// Returns true for codes outside the named range
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for FluidType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "Unknown ({})", code),
            named => f.write_str(named.name()),
        }
    }
}

/// Tank sensor status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TankStatus {
    /// Reading is valid (code 0)
    #[default]
    Ok,
    /// Sender disconnected / open circuit (code 1)
    Disconnected,
    /// Sender short circuited (code 2)
    ShortCircuited,
    /// Sender wired with reverse polarity (code 3)
    ReversePolarity,
    /// Status unknown (code 4)
    Unknown,
    /// Generic sensor error (code 5)
    Error,
}

impl TankStatus {
    /// Map a raw code; out-of-range codes become `Unknown`
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Disconnected,
            2 => Self::ShortCircuited,
            3 => Self::ReversePolarity,
            5 => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// Raw code
    pub fn code(&self) -> i64 {
        match self {
            Self::Ok => 0,
            Self::Disconnected => 1,
            Self::ShortCircuited => 2,
            Self::ReversePolarity => 3,
            Self::Unknown => 4,
            Self::Error => 5,
        }
    }

    /// Whether the level reading can be trusted
    pub fn is_ok(&self) -> bool {
        *self == Self::Ok
    }

    /// Error text shown in place of the level
    pub fn description(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Disconnected => "Open circuit",
            Self::ShortCircuited => "Short circuited",
            Self::ReversePolarity => "Reverse polarity",
            Self::Unknown => "Unknown",
            Self::Error => "Error",
        }
    }
}
