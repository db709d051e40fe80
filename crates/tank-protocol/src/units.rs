//! Volume unit lookup table
//!
//! Tank services report volumes in cubic meters. Display code scales them
//! into the unit selected in the system settings; precision and step size are
//! fixed per unit.

use std::fmt;

use crate::error::CodecError;

/// Volume unit selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VolumeUnit {
    /// Cubic meters (code 0)
    #[default]
    CubicMeters,
    /// Liters (code 1)
    Liters,
    /// Imperial gallons (code 2)
    ImperialGallons,
    /// US gallons (code 3)
    UsGallons,
}

/// One row of the unit table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitSpec {
    /// Multiplier from cubic meters
    pub factor: f64,
    /// Decimal places shown
    pub precision: usize,
    /// Smallest editable increment, in this unit
    pub step: f64,
    /// Display suffix
    pub suffix: &'static str,
}

const UNIT_TABLE: [UnitSpec; 4] = [
    UnitSpec {
        factor: 1.0,
        precision: 3,
        step: 0.001,
        suffix: "m3",
    },
    UnitSpec {
        factor: 1000.0,
        precision: 0,
        step: 1.0,
        suffix: "L",
    },
    UnitSpec {
        factor: 219.969_248_299_1,
        precision: 1,
        step: 0.1,
        suffix: "gal",
    },
    UnitSpec {
        factor: 264.172_052_358_1,
        precision: 1,
        step: 0.1,
        suffix: "gal",
    },
];

impl VolumeUnit {
    /// All units in code order
    pub const ALL: [VolumeUnit; 4] = [
        VolumeUnit::CubicMeters,
        VolumeUnit::Liters,
        VolumeUnit::ImperialGallons,
        VolumeUnit::UsGallons,
    ];

    /// Map a settings code to a unit
    pub fn from_code(code: i64) -> Result<Self, CodecError> {
        usize::try_from(code)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(CodecError::UnknownUnit(code))
    }

    /// Settings code
    pub fn code(&self) -> i64 {
        *self as i64
    }

    /// Table row for this unit
    pub fn spec(&self) -> UnitSpec {
        UNIT_TABLE[*self as usize]
    }

    /// Convert a volume in cubic meters to this unit
    pub fn from_cubic_meters(&self, m3: f64) -> f64 {
        m3 * self.spec().factor
    }

    /// Convert a volume in this unit to cubic meters
    pub fn to_cubic_meters(&self, value: f64) -> f64 {
        value / self.spec().factor
    }

    /// Format a volume given in cubic meters
    pub fn format(&self, m3: f64) -> String {
        let spec = self.spec();
        format!(
            "{:.*} {}",
            spec.precision,
            self.from_cubic_meters(m3),
            spec.suffix
        )
    }
}

impl fmt::Display for VolumeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CubicMeters => "Cubic meters",
            Self::Liters => "Liters",
            Self::ImperialGallons => "Imperial gallons",
            Self::UsGallons => "US gallons",
        };
        f.write_str(name)
    }
}
