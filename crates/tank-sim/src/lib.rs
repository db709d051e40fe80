//! Tank Feed Simulation Library
//!
//! This crate provides a simulated rotating tank feed for exercising the
//! repeater without sensor hardware. It includes:
//!
//! - **SimulatedSeeLevel**: steps through up to six tanks, one fluid type
//!   each, reporting them one at a time through a single service
//! - **run_simulator_task**: registers the simulated service on a
//!   [`tank_mux::MemoryBus`] and feeds the repeater actor on a fixed period
//!
//! # Example
//!
//! ```rust
//! use tank_protocol::{BusValue, TankPath};
//! use tank_sim::SimulatedSeeLevel;
//!
//! let mut sim = SimulatedSeeLevel::default();
//! sim.set_level(0, Some(45.0)).unwrap();
//!
//! let fields = sim.step().unwrap();
//! assert!(fields.get(TankPath::FluidType).and_then(BusValue::as_i64).is_some());
//! ```

pub mod error;
pub mod seelevel;
pub mod task;

pub use error::SimError;
pub use seelevel::{
    SeeLevelConfig, SimulatedSeeLevel, SIMULATED_PRODUCT_ID, SIMULATED_SERVICE_NAME, TANK_COUNT,
};
pub use task::{run_simulator_task, FeedMode, SimulatorCommand};
