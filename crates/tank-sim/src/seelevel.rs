//! Simulated SeeLevel tank system
//!
//! A SeeLevel N2K system reports one tank at a time through a single tank
//! service, stepping through its enabled tanks in fluid-type order. This
//! model reproduces that rotation so the repeater can be exercised without
//! hardware.

use serde::{Deserialize, Serialize};
use tank_mux::ItemBatch;
use tank_protocol::{BusValue, FluidType, RawFields, TankPath};

use crate::error::SimError;

/// Product id the simulated service reports
pub const SIMULATED_PRODUCT_ID: i64 = 999_999;

/// Bus name of the simulated service
pub const SIMULATED_SERVICE_NAME: &str = "com.victronenergy.tank.SimulatedSeeLevel";

/// One tank per named fluid type
pub const TANK_COUNT: usize = 6;

/// Cubic meters per US gallon
const M3_PER_US_GALLON: f64 = 0.003_785_411_8;

/// Simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeeLevelConfig {
    /// Starting level per tank in percent, `None` for a disabled tank
    pub levels: [Option<f64>; TANK_COUNT],
    /// Level change per step in auto mode
    pub increments: [f64; TANK_COUNT],
    /// Capacity reported for every tank, in cubic meters
    pub capacity_m3: f64,
    /// Vary levels on every step
    pub auto: bool,
}

impl Default for SeeLevelConfig {
    fn default() -> Self {
        Self {
            // fuel, fresh, gray, live well, oil, black
            levels: [None, Some(70.0), Some(30.0), None, None, Some(60.0)],
            increments: [0.0, -3.0, 2.0, 0.0, 0.0, 1.0],
            capacity_m3: 30.0 * M3_PER_US_GALLON,
            auto: false,
        }
    }
}

/// A simulated rotating tank feed
#[derive(Debug, Clone)]
pub struct SimulatedSeeLevel {
    levels: [Option<f64>; TANK_COUNT],
    increments: [f64; TANK_COUNT],
    capacity_m3: f64,
    auto: bool,
    tank: usize,
    last_reported: Option<usize>,
}

impl Default for SimulatedSeeLevel {
    fn default() -> Self {
        Self::new(SeeLevelConfig::default())
    }
}

impl SimulatedSeeLevel {
    /// Create from a configuration
    pub fn new(config: SeeLevelConfig) -> Self {
        let mut sim = Self {
            levels: config.levels,
            increments: config.increments,
            capacity_m3: config.capacity_m3,
            auto: config.auto,
            tank: 0,
            last_reported: None,
        };
        sim.tank = sim.next_enabled(TANK_COUNT - 1).unwrap_or(0);
        sim
    }

    /// Whether levels vary on every step
    pub fn auto(&self) -> bool {
        self.auto
    }

    /// Enable or disable level variation
    pub fn set_auto(&mut self, auto: bool) {
        self.auto = auto;
    }

    /// Current level of a tank
    pub fn level(&self, tank: usize) -> Option<f64> {
        self.levels.get(tank).copied().flatten()
    }

    /// Set a tank's level, `None` disables the tank
    pub fn set_level(&mut self, tank: usize, level: Option<f64>) -> Result<(), SimError> {
        if tank >= TANK_COUNT {
            return Err(SimError::InvalidTank(tank));
        }
        if let Some(l) = level {
            if !(0.0..=100.0).contains(&l) {
                return Err(SimError::LevelOutOfRange(l));
            }
        }
        self.levels[tank] = level;
        if self.levels[self.tank].is_none() {
            self.tank = self.next_enabled(self.tank).unwrap_or(self.tank);
        }
        Ok(())
    }

    /// Number of tanks currently in the rotation
    pub fn enabled_count(&self) -> usize {
        self.levels.iter().filter(|l| l.is_some()).count()
    }

    /// Tank reported by the previous step
    pub fn last_reported(&self) -> Option<usize> {
        self.last_reported
    }

    /// Report the current tank and move to the next enabled one
    ///
    /// Returns `None` when every tank is disabled.
    pub fn step(&mut self) -> Option<RawFields> {
        let tank = self.tank;
        let mut level = self.levels[tank]?;

        if self.auto {
            level += self.increments[tank];
            if !(0.0..=100.0).contains(&level) {
                self.increments[tank] = -self.increments[tank];
                level += self.increments[tank];
            }
            level = level.clamp(0.0, 100.0);
            self.levels[tank] = Some(level);
        }

        self.last_reported = Some(tank);
        self.tank = self.next_enabled(tank).unwrap_or(tank);

        Some(
            RawFields::new()
                .with(TankPath::FluidType, FluidType::NAMED[tank].code())
                .with(TankPath::Level, level)
                .with(TankPath::Capacity, self.capacity_m3),
        )
    }

    /// Report the current tank as individual path changes, in signal order
    pub fn step_signals(&mut self) -> Vec<(TankPath, BusValue)> {
        let Some(fields) = self.step() else {
            return Vec::new();
        };
        [TankPath::FluidType, TankPath::Level, TankPath::Capacity]
            .into_iter()
            .filter_map(|path| fields.get(path).map(|v| (path, v.clone())))
            .collect()
    }

    /// Attributes of the simulated service at registration
    pub fn service_items(&self) -> ItemBatch {
        let current = FluidType::NAMED[self.tank].code();
        vec![
            ("/Mgmt/ProcessName".into(), "tank-sim".into()),
            ("/Mgmt/ProcessVersion".into(), env!("CARGO_PKG_VERSION").into()),
            ("/Mgmt/Connection".into(), "".into()),
            ("/DeviceInstance".into(), BusValue::Int(1)),
            ("/ProductName".into(), "Simulated SeeLevel N2K".into()),
            ("/ProductId".into(), BusValue::Int(SIMULATED_PRODUCT_ID)),
            ("/FirmwareVersion".into(), BusValue::Int(0)),
            ("/HardwareVersion".into(), BusValue::Int(0)),
            ("/Serial".into(), "no hardware".into()),
            ("/Connected".into(), BusValue::Int(1)),
            (
                TankPath::Level.as_str().into(),
                self.level(self.tank).map_or(BusValue::Invalid, BusValue::Double),
            ),
            (TankPath::FluidType.as_str().into(), BusValue::Int(current)),
            (TankPath::Capacity.as_str().into(), BusValue::Double(self.capacity_m3)),
            (TankPath::CustomName.as_str().into(), "".into()),
        ]
    }

    fn next_enabled(&self, from: usize) -> Option<usize> {
        (1..=TANK_COUNT)
            .map(|offset| (from + offset) % TANK_COUNT)
            .find(|&t| self.levels[t].is_some())
    }
}
